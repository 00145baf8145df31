//! # bmc-audit
//!
//! Audit correlation and durability subsystem for BMC logging stacks.
//!
//! When a caller reports that an audited operation finished, the subsystem
//! first brings the systemd journal to a synchronized state, so everything
//! recorded before the report is durable and readable, then scans the
//! journal backward and returns the allow-listed `KEY=VALUE` fields of
//! every entry tagged with the operation's transaction id.
//!
//! ## Features
//!
//! - **Durability barrier**: bounded flush-and-wait handshake against the
//!   journald sync marker before any scan is trusted
//! - **Correlation scan**: backward scan with byte-exact transaction id
//!   matching; per-entry field order is preserved
//! - **Transport**: JSON request/reply endpoint over NATS with a queue group
//! - **Sinks**: results optionally appended to a JSON-lines audit file
//! - **Degraded operation**: an unreachable store shortens results, it never
//!   fails a notification
//!
//! ## Example
//!
//! ```rust,no_run
//! use bmc_audit::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Load configuration
//!     let config = Config::load()?;
//!
//!     // Initialize tracing
//!     init_tracing(&config)?;
//!
//!     // Connect and serve the notify endpoint
//!     let client = bus::connect(&config.service.name, &config.bus).await?;
//!     let manager = Manager::from_config(&config);
//!     bus::serve(client, manager, &config.bus, std::future::pending()).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod journal;
pub mod manager;
pub mod observability;
pub mod sink;
pub mod sync;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bus::{self, AuditClient, NotifyReply, NotifyRequest};
    pub use crate::config::{BusConfig, Config, ScanConfig, SinkConfig, SyncConfig};
    pub use crate::error::{Error, Result};
    pub use crate::journal::{
        AdditionalData, JournalCursor, JournalEntry, JournalReader, JournalScanner,
        JournalctlReader,
    };
    pub use crate::manager::Manager;
    pub use crate::observability::init_tracing;
    pub use crate::sink::{AuditSink, FileSink, NullSink};
    pub use crate::sync::{
        ChangeWatch, JournaldControl, StoreControl, SyncCoordinator, SyncMark, SyncOutcome,
    };

    // Re-export tracing macros and types
    pub use tracing::{debug, error, info, trace, warn};

    // Re-export tokio for async runtime
    pub use tokio;

    // Re-export async-trait for async trait definitions
    pub use async_trait::async_trait;

    pub use serde::{Deserialize, Serialize};
}
