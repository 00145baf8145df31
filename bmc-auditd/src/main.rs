//! Audit notification daemon
//!
//! Wires the journald flush control, the journalctl scanner, and the
//! configured sink together, then serves the notify endpoint on the bus
//! until SIGINT or SIGTERM.

use anyhow::Result;
use clap::Parser;
use tokio::signal;

use bmc_audit::prelude::*;

/// bmc-auditd - audit notification daemon
#[derive(Parser)]
#[command(name = "bmc-auditd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Load configuration from a specific file instead of the search path
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = match args.config.as_deref() {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // Initialize tracing
    init_tracing(&config)?;

    tracing::info!(
        marker = %config.sync.marker_path.display(),
        subject = %config.bus.subject,
        "Starting bmc-auditd"
    );

    let client = bus::connect(&config.service.name, &config.bus).await?;
    let manager = Manager::from_config(&config);
    bus::serve(client, manager, &config.bus, shutdown_signal()).await?;

    tracing::info!("bmc-auditd stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
