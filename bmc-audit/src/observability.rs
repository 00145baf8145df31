//! Tracing setup for the daemon and CLI
//!
//! Log output goes to the console in text or JSON form, or straight to the
//! systemd journal when the `journald` feature is enabled and configured.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{config::Config, error::Result};

/// Initialize tracing from the service configuration
pub fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_new(&config.service.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(feature = "journald")]
    if config.service.journald {
        match tracing_journald::layer() {
            Ok(journald) => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(journald)
                    .init();
                tracing::info!("Tracing initialized for service: {}", config.service.name);
                return Ok(());
            }
            Err(err) => {
                // No journal socket (containers, dev hosts); use the console
                init_fmt(filter, config);
                tracing::warn!("Journald logging unavailable, using console: {}", err);
                tracing::info!("Tracing initialized for service: {}", config.service.name);
                return Ok(());
            }
        }
    }

    init_fmt(filter, config);
    tracing::info!("Tracing initialized for service: {}", config.service.name);
    Ok(())
}

fn init_fmt(filter: EnvFilter, config: &Config) {
    if config.service.log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}
