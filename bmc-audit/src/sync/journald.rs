//! Production store control for a journald-style log store
//!
//! journald maintains `/run/systemd/journal/synced`, a file holding the
//! CLOCK_MONOTONIC microsecond timestamp of the last completed flush, and
//! renames it into place so directory watchers see a moved-to event. A flush
//! is requested by delivering SIGRTMIN+1 to the journald main process, here
//! via a configurable service-manager command.

use std::time::Duration;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use inotify::{EventStream, Inotify, WatchMask};
use tokio::process::Command;

use super::{ChangeWatch, StoreControl, SyncMark};
use crate::config::SyncConfig;
use crate::error::{Error, Result};

/// [`StoreControl`] over the journald marker file and flush signal
pub struct JournaldControl {
    config: SyncConfig,
}

impl JournaldControl {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

#[async_trait]
impl StoreControl for JournaldControl {
    fn now(&self) -> SyncMark {
        monotonic_usec()
    }

    async fn sync_mark(&self) -> Option<SyncMark> {
        let content = match tokio::fs::read_to_string(&self.config.marker_path).await {
            Ok(content) => content,
            Err(err) => {
                // a missing marker simply means no flush has completed yet
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        "Unreadable journal sync marker {}: {}",
                        self.config.marker_path.display(),
                        err
                    );
                }
                return None;
            }
        };
        match content.trim().parse::<SyncMark>() {
            Ok(mark) => Some(mark),
            Err(err) => {
                tracing::warn!(
                    "Malformed journal sync marker {:?}: {}",
                    content.trim(),
                    err
                );
                None
            }
        }
    }

    async fn request_flush(&self) -> Result<()> {
        let (program, args) = self
            .config
            .flush_argv()
            .ok_or_else(|| Error::store("flush command not configured"))?;

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|err| Error::store(format!("spawn {}: {}", program, err)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::store(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn watch(&self) -> Result<Box<dyn ChangeWatch>> {
        let dir = self.config.marker_path.parent().ok_or_else(|| {
            Error::store(format!(
                "marker path {} has no parent directory",
                self.config.marker_path.display()
            ))
        })?;

        let inotify =
            Inotify::init().map_err(|err| Error::store(format!("inotify init: {}", err)))?;
        inotify
            .watches()
            .add(
                dir,
                WatchMask::MOVED_TO | WatchMask::DONT_FOLLOW | WatchMask::ONLYDIR,
            )
            .map_err(|err| Error::store(format!("watch {}: {}", dir.display(), err)))?;
        let stream = inotify
            .into_event_stream([0u8; 1024])
            .map_err(|err| Error::store(format!("inotify stream: {}", err)))?;

        Ok(Box::new(JournaldWatch { stream }))
    }
}

/// Directory watch whose inotify descriptor closes on drop
struct JournaldWatch {
    stream: EventStream<[u8; 1024]>,
}

#[async_trait]
impl ChangeWatch for JournaldWatch {
    async fn wait(&mut self, timeout: Duration) -> Result<bool> {
        match tokio::time::timeout(timeout, self.stream.next()).await {
            Err(_) => Ok(false),
            Ok(None) => Err(Error::store("inotify stream closed")),
            Ok(Some(Err(err))) => Err(Error::store(format!("inotify read: {}", err))),
            Ok(Some(Ok(_))) => {
                // throw away everything already queued; the caller re-reads
                // the marker itself
                while let Some(Some(Ok(_))) = self.stream.next().now_or_never() {}
                Ok(true)
            }
        }
    }
}

/// Microseconds on CLOCK_MONOTONIC, the clock journald stamps the marker with
fn monotonic_usec() -> SyncMark {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // cannot fail for CLOCK_MONOTONIC with a valid timespec pointer
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as u64 * 1_000_000 + ts.tv_nsec as u64 / 1_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn control_for(dir: &tempfile::TempDir, flush: &[&str]) -> JournaldControl {
        JournaldControl::new(&SyncConfig {
            marker_path: dir.path().join("synced"),
            flush_command: flush.iter().map(|s| s.to_string()).collect(),
            ..SyncConfig::default()
        })
    }

    #[test]
    fn test_monotonic_usec_advances() {
        let first = monotonic_usec();
        let second = monotonic_usec();
        assert!(first > 0);
        assert!(second >= first);
    }

    #[tokio::test]
    async fn test_sync_mark_reads_decimal_marker() {
        let dir = tempfile::tempdir().unwrap();
        let control = control_for(&dir, &["true"]);
        tokio::fs::write(dir.path().join("synced"), "123456789\n")
            .await
            .unwrap();
        assert_eq!(control.sync_mark().await, Some(123456789));
    }

    #[tokio::test]
    async fn test_sync_mark_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let control = control_for(&dir, &["true"]);
        assert_eq!(control.sync_mark().await, None);
    }

    #[tokio::test]
    async fn test_sync_mark_malformed_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let control = control_for(&dir, &["true"]);
        tokio::fs::write(dir.path().join("synced"), "not-a-number\n")
            .await
            .unwrap();
        assert_eq!(control.sync_mark().await, None);
    }

    #[tokio::test]
    async fn test_request_flush_success_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        assert!(control_for(&dir, &["true"]).request_flush().await.is_ok());
        assert!(control_for(&dir, &["false"]).request_flush().await.is_err());
        assert!(control_for(&dir, &[]).request_flush().await.is_err());
        assert!(control_for(&dir, &["/nonexistent/systemctl"])
            .request_flush()
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_watch_sees_marker_rename() {
        let dir = tempfile::tempdir().unwrap();
        let control = control_for(&dir, &["true"]);
        let mut watch = control.watch().await.unwrap();

        // journald writes a temp file and renames it over the marker
        let tmp = dir.path().join("synced.tmp");
        tokio::fs::write(&tmp, "42\n").await.unwrap();
        tokio::fs::rename(&tmp, dir.path().join("synced"))
            .await
            .unwrap();

        let got_event = watch.wait(Duration::from_secs(5)).await.unwrap();
        assert!(got_event);

        // the queue was drained, so a quiet directory times out now
        let got_event = watch.wait(Duration::from_millis(50)).await.unwrap();
        assert!(!got_event);
    }

    #[tokio::test]
    async fn test_watch_times_out_on_quiet_directory() {
        let dir = tempfile::tempdir().unwrap();
        let control = control_for(&dir, &["true"]);
        let mut watch = control.watch().await.unwrap();
        let got_event = watch.wait(Duration::from_millis(50)).await.unwrap();
        assert!(!got_event);
    }

    #[tokio::test]
    async fn test_watch_requires_parent_directory() {
        let control = JournaldControl::new(&SyncConfig {
            marker_path: PathBuf::from("/"),
            ..SyncConfig::default()
        });
        assert!(control.watch().await.is_err());
    }
}
