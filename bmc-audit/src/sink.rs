//! Downstream consumers for notification results
//!
//! The manager hands every `AdditionalData` it produces to an [`AuditSink`]
//! in addition to returning it, so the data is never silently dropped. The
//! file sink appends one JSON record per notification to a local audit file;
//! rotation is left to the host's log management.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::config::SinkConfig;
use crate::error::Result;
use crate::journal::AdditionalData;

/// Receiver for the result of each notification
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Consume the outcome of one notify call
    async fn consume(&self, transaction_id: u64, data: &AdditionalData) -> Result<()>;
}

/// Sink that discards everything; the caller still gets the return value
pub struct NullSink;

#[async_trait]
impl AuditSink for NullSink {
    async fn consume(&self, _transaction_id: u64, _data: &AdditionalData) -> Result<()> {
        Ok(())
    }
}

/// Appends one JSON line per notification to the configured audit file
pub struct FileSink {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
struct AuditRecord<'a> {
    timestamp: DateTime<Utc>,
    transaction_id: u64,
    additional_data: &'a [String],
}

impl FileSink {
    pub fn new(config: &SinkConfig) -> Self {
        Self {
            path: config.path.clone(),
        }
    }
}

#[async_trait]
impl AuditSink for FileSink {
    async fn consume(&self, transaction_id: u64, data: &AdditionalData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let record = AuditRecord {
            timestamp: Utc::now(),
            transaction_id,
            additional_data: data,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        Ok(())
    }
}
