//! Production journal reader backed by the journalctl export interface

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};

use super::{JournalCursor, JournalEntry, JournalReader};
use crate::config::ScanConfig;
use crate::error::{Error, Result};

/// Reads the journal through `journalctl --output=json --reverse`
///
/// The JSON export is the store's documented read surface, which keeps this
/// reader free of native journal bindings. Each cursor owns its own child
/// process; the child is killed when the cursor is dropped, so an abandoned
/// scan does not leave a journalctl running.
pub struct JournalctlReader {
    journalctl_path: String,
}

impl JournalctlReader {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            journalctl_path: config.journalctl_path.clone(),
        }
    }
}

#[async_trait]
impl JournalReader for JournalctlReader {
    async fn open_backward(&self) -> Result<Box<dyn JournalCursor>> {
        let mut child = Command::new(&self.journalctl_path)
            // --all keeps binary field values as byte arrays instead of null
            .args(["--output=json", "--reverse", "--all", "--quiet", "--no-pager"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| Error::journal(format!("spawn {}: {}", self.journalctl_path, err)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::journal("journalctl stdout not captured"))?;

        Ok(Box::new(JournalctlCursor {
            lines: BufReader::new(stdout).lines(),
            child,
        }))
    }
}

struct JournalctlCursor {
    lines: Lines<BufReader<ChildStdout>>,
    child: Child,
}

#[async_trait]
impl JournalCursor for JournalctlCursor {
    async fn next_entry(&mut self) -> Result<Option<JournalEntry>> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|err| Error::journal(format!("read journalctl output: {}", err)))?;
            match line {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => match JournalEntry::from_export_json(&line) {
                    Ok(entry) => return Ok(Some(entry)),
                    Err(err) => {
                        tracing::warn!("Skipping malformed journal line: {}", err);
                        continue;
                    }
                },
                None => {
                    // distinguish an empty journal from a failed journalctl
                    let status = self
                        .child
                        .wait()
                        .await
                        .map_err(|err| Error::journal(format!("wait for journalctl: {}", err)))?;
                    if !status.success() {
                        return Err(Error::journal(format!("journalctl exited with {}", status)));
                    }
                    return Ok(None);
                }
            }
        }
    }
}
