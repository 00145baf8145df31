//! Notification orchestration
//!
//! `Manager` ties the durability handshake to the correlation scan: every
//! notification first brings the store's sync marker up to the call instant,
//! then scans for the transaction's fields. The barrier runs first so that
//! entries recorded before the notification are readable by the scan. The
//! result goes to the configured sink and back to the caller; a degraded
//! store shortens the result but never turns it into an error.

use std::sync::Arc;

use crate::config::Config;
use crate::journal::{AdditionalData, JournalReader, JournalScanner, JournalctlReader};
use crate::sink::{AuditSink, FileSink, NullSink};
use crate::sync::{JournaldControl, StoreControl, SyncCoordinator};

pub struct Manager<S, R> {
    coordinator: SyncCoordinator<S>,
    scanner: JournalScanner<R>,
    sink: Arc<dyn AuditSink>,
}

impl<S, R> Manager<S, R>
where
    S: StoreControl,
    R: JournalReader,
{
    pub fn new(coordinator: SyncCoordinator<S>, scanner: JournalScanner<R>) -> Self {
        Self {
            coordinator,
            scanner,
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Handle one audit notification
    ///
    /// Returns the `KEY=VALUE` fields of every entry tagged with
    /// `transaction_id`, most recent entry first. Sync or scan degradation
    /// yields a shorter, possibly empty, result.
    pub async fn notify(&self, transaction_id: u64) -> AdditionalData {
        let started = std::time::Instant::now();
        tracing::debug!(transaction_id, "Audit notification received");

        let outcome = self.coordinator.sync().await;
        if !outcome.is_synced() {
            tracing::warn!(
                transaction_id,
                outcome = ?outcome,
                "Journal sync incomplete, scanning what is durable"
            );
        }

        let data = self.scanner.additional_data(transaction_id).await;
        tracing::info!(
            transaction_id,
            fields = data.len(),
            duration_ms = started.elapsed().as_millis(),
            "Audit notification processed"
        );

        if let Err(err) = self.sink.consume(transaction_id, &data).await {
            tracing::error!(transaction_id, "Audit sink rejected record: {}", err);
        }
        data
    }
}

impl Manager<JournaldControl, JournalctlReader> {
    /// Production wiring: journald flush control, journalctl scans, and the
    /// configured file sink when one is set
    pub fn from_config(config: &Config) -> Self {
        let coordinator =
            SyncCoordinator::new(JournaldControl::new(&config.sync), config.sync.clone());
        let scanner =
            JournalScanner::new(JournalctlReader::new(&config.scan), config.scan.clone());
        let sink: Arc<dyn AuditSink> = match &config.sink {
            Some(file) => Arc::new(FileSink::new(file)),
            None => Arc::new(NullSink),
        };
        Self::new(coordinator, scanner).with_sink(sink)
    }
}
