//! Read model for the external structured log store
//!
//! The store is journald-shaped: append-only entries made of named fields
//! whose values are raw bytes. This module owns the entry representation,
//! the reader seam the scanner drives, and the backward filtered scan that
//! turns entries tagged with a transaction id into `KEY=VALUE` strings.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::ScanConfig;
use crate::error::Result;

pub mod journalctl;

pub use journalctl::JournalctlReader;

/// Ordered `KEY=VALUE` strings collected for one transaction
pub type AdditionalData = Vec<String>;

/// One record of the external log store
///
/// Fields keep the store's natural per-entry order, and values are raw bytes
/// because the store does not guarantee UTF-8 text. A field name may occur
/// more than once within a single entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalEntry {
    fields: Vec<(String, Vec<u8>)>,
}

impl JournalEntry {
    /// Append a field, keeping insertion order
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Builder-style variant of [`push`](Self::push)
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.push(name, value);
        self
    }

    /// Value of the first occurrence of a field, if present
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    /// All fields in entry order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parse one line of `journalctl --output=json`
    ///
    /// String values are UTF-8 field data, integer arrays are non-UTF-8 field
    /// data, and nested arrays carry a field that occurs multiple times in
    /// the entry. `null` marks a value journalctl withheld for size, which is
    /// treated as absent.
    pub fn from_export_json(line: &str) -> Result<Self> {
        let map: serde_json::Map<String, Value> = serde_json::from_str(line)?;
        let mut entry = JournalEntry::default();
        for (name, value) in map {
            // __CURSOR and the __*_TIMESTAMP keys are cursor metadata, not
            // entry fields
            if name.starts_with("__") {
                continue;
            }
            match value {
                Value::Array(items) if items.first().is_some_and(|i| !i.is_number()) => {
                    for item in &items {
                        if let Some(bytes) = value_bytes(item) {
                            entry.push(name.clone(), bytes);
                        }
                    }
                }
                other => {
                    if let Some(bytes) = value_bytes(&other) {
                        entry.push(name, bytes);
                    }
                }
            }
        }
        Ok(entry)
    }
}

fn value_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::String(s) => Some(s.clone().into_bytes()),
        Value::Number(n) => Some(n.to_string().into_bytes()),
        Value::Array(items) => {
            let mut bytes = Vec::with_capacity(items.len());
            for item in items {
                bytes.push(item.as_u64().filter(|b| *b <= 255)? as u8);
            }
            Some(bytes)
        }
        _ => None,
    }
}

/// Source of backward cursors over the log store
#[async_trait]
pub trait JournalReader: Send + Sync {
    /// Open a cursor positioned after the newest entry, iterating backward
    async fn open_backward(&self) -> Result<Box<dyn JournalCursor>>;
}

/// One pass over the store, most recent entry first
#[async_trait]
pub trait JournalCursor: Send {
    /// Next entry in cursor order, `None` once the oldest retained entry has
    /// been passed
    async fn next_entry(&mut self) -> Result<Option<JournalEntry>>;
}

/// Backward filtered scan over a [`JournalReader`]
///
/// Read-only and deliberately failure-tolerant: an unreachable store yields
/// an empty result and an error log, never an `Err` to the caller.
pub struct JournalScanner<R> {
    reader: R,
    config: ScanConfig,
}

impl<R: JournalReader> JournalScanner<R> {
    pub fn new(reader: R, config: ScanConfig) -> Self {
        Self { reader, config }
    }

    /// Collect allow-listed fields from every entry tagged with the id
    ///
    /// Entries are visited most recent first; within an entry, fields keep
    /// their own order. The transaction field is compared byte-exact against
    /// the decimal rendering of the id.
    pub async fn additional_data(&self, transaction_id: u64) -> AdditionalData {
        let started = std::time::Instant::now();
        let needle = transaction_id.to_string();
        let mut data = AdditionalData::new();

        let mut cursor = match self.reader.open_backward().await {
            Ok(cursor) => cursor,
            Err(err) => {
                tracing::error!(transaction_id, "Journal store unavailable: {}", err);
                return data;
            }
        };

        let mut examined: u64 = 0;
        let mut matched: u64 = 0;
        loop {
            if let Some(max) = self.config.max_entries {
                if examined >= max {
                    tracing::debug!(transaction_id, max, "Scan entry bound reached");
                    break;
                }
            }
            match cursor.next_entry().await {
                Ok(Some(entry)) => {
                    examined += 1;
                    if entry.get(&self.config.transaction_field) != Some(needle.as_bytes()) {
                        continue;
                    }
                    matched += 1;
                    for (name, value) in entry.fields() {
                        if self.config.fields.iter().any(|f| f == name) {
                            data.push(format!("{}={}", name, String::from_utf8_lossy(value)));
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(transaction_id, "Journal read failed mid-scan: {}", err);
                    break;
                }
            }
        }

        tracing::debug!(
            transaction_id,
            examined,
            matched,
            fields = data.len(),
            duration_ms = started.elapsed().as_millis(),
            "Journal scan complete"
        );
        data
    }
}
