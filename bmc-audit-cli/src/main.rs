//! Operator CLI for the audit subsystem
//!
//! Thin wrapper over [`AuditClient`]: sends a notification over the bus and
//! prints the correlated fields the daemon returns.

use clap::{Parser, Subcommand};
use colored::Colorize;

use bmc_audit::prelude::*;

/// audctl - BMC audit subsystem control
#[derive(Parser)]
#[command(name = "audctl")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Load configuration from a specific file instead of the search path
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send an audit notification for a transaction id
    Notify {
        /// Transaction id the audited operation was tagged with
        transaction_id: u64,

        /// Publish without waiting for the correlated fields
        #[arg(long)]
        no_reply: bool,

        /// Reply timeout in seconds (overrides configuration)
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse();

    // Execute command
    let result = match cli.command {
        Commands::Notify {
            transaction_id,
            no_reply,
            timeout,
        } => notify(cli.config.as_deref(), transaction_id, no_reply, timeout).await,
    };

    // Handle result
    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);

            // Show context if available
            if let Some(source) = e.source() {
                eprintln!("\n{} {}", "Caused by:".yellow(), source);
            }

            std::process::exit(1);
        }
    }
}

async fn notify(
    config_path: Option<&str>,
    transaction_id: u64,
    no_reply: bool,
    timeout: Option<u64>,
) -> anyhow::Result<()> {
    let mut config = match config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(secs) = timeout {
        config.bus.request_timeout_secs = secs;
    }
    // one connection attempt; a dead bus should fail fast at a prompt
    config.bus.max_retries = 0;

    let client = bus::connect("audctl", &config.bus).await?;
    let audit = AuditClient::new(client, &config.bus);

    if no_reply {
        audit.notify_noreply(transaction_id).await?;
        println!(
            "{} notification published for transaction {}",
            "ok:".green().bold(),
            transaction_id
        );
        return Ok(());
    }

    let data = audit.notify(transaction_id).await?;
    if data.is_empty() {
        println!(
            "{} no journal entries tagged with transaction {}",
            "ok:".green().bold(),
            transaction_id
        );
        return Ok(());
    }

    println!(
        "{} {} field(s) for transaction {}, most recent entry first:",
        "ok:".green().bold(),
        data.len(),
        transaction_id
    );
    for field in &data {
        match field.split_once('=') {
            Some((name, value)) => println!("  {}={}", name.cyan(), value),
            None => println!("  {}", field),
        }
    }
    Ok(())
}
