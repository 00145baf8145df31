//! Durability handshake with the log store
//!
//! The store buffers writes and flushes them asynchronously; entries written
//! moments ago may not yet be visible to readers. Before any scan is trusted,
//! the coordinator asks the store to flush and waits, bounded, until the
//! store's sync marker reaches the instant the call began. Everything the
//! coordinator touches on the store side goes through [`StoreControl`], so
//! the state machine is testable against a fake store.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::SyncConfig;
use crate::error::Result;

pub mod journald;

pub use journald::JournaldControl;

/// Instant in the store's own clock domain, microseconds
pub type SyncMark = u64;

/// Administrative surface of the log store
#[async_trait]
pub trait StoreControl: Send + Sync {
    /// Current instant in the store's clock domain
    fn now(&self) -> SyncMark;

    /// Mark of the last completed flush
    ///
    /// `None` when the marker is missing or unreadable, both of which mean
    /// "not yet synced" rather than an error.
    async fn sync_mark(&self) -> Option<SyncMark>;

    /// One-shot administrative request that the store flush buffered writes
    async fn request_flush(&self) -> Result<()>;

    /// Open a change watch on the marker location
    async fn watch(&self) -> Result<Box<dyn ChangeWatch>>;
}

/// Change notification on the marker location
///
/// Implementations release their watch resource on drop; the coordinator
/// keeps the watch inside the call frame so every exit path cleans up.
#[async_trait]
pub trait ChangeWatch: Send {
    /// Block until the watched location changes or the timeout elapses
    ///
    /// `Ok(true)` means an event arrived and all pending notification data
    /// was drained; `Ok(false)` means the timeout passed with no event.
    async fn wait(&mut self, timeout: Duration) -> Result<bool>;
}

/// How a sync call ended
///
/// None of these is an error for the caller; the scan proceeds with whatever
/// is durable. The distinction exists for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The marker already covered the call start; no flush was needed
    AlreadySynced,
    /// A flush was requested and the marker advanced past the call start
    Synced,
    /// No marker change within the wait timeout
    TimedOut,
    /// The flush request or the watch could not be set up
    Unavailable,
    /// The attempt ceiling passed without the marker reaching the call start
    GaveUp,
}

impl SyncOutcome {
    /// True when the durability invariant was established
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncOutcome::AlreadySynced | SyncOutcome::Synced)
    }
}

/// Bounded flush-and-wait loop over a [`StoreControl`]
pub struct SyncCoordinator<S> {
    store: S,
    config: SyncConfig,
}

impl<S: StoreControl> SyncCoordinator<S> {
    pub fn new(store: S, config: SyncConfig) -> Self {
        Self { store, config }
    }

    /// Bring the store's marker up to the instant this call starts
    ///
    /// Checks the marker first and returns without side effects when it is
    /// already fresh. Otherwise requests one flush, then watches the marker
    /// location, re-checking after every change event, for at most
    /// `max_attempts` waits of `wait_timeout` each. All failure modes are
    /// logged here and folded into the returned outcome.
    pub async fn sync(&self) -> SyncOutcome {
        let start = self.store.now();

        if self.mark_reached(start).await {
            tracing::debug!(start, "Journal already synced");
            return SyncOutcome::AlreadySynced;
        }

        if let Err(err) = self.store.request_flush().await {
            tracing::error!("Failed to request journal flush: {}", err);
            return SyncOutcome::Unavailable;
        }

        let mut watch = match self.store.watch().await {
            Ok(watch) => watch,
            Err(err) => {
                tracing::error!("Failed to watch journal marker directory: {}", err);
                return SyncOutcome::Unavailable;
            }
        };

        let timeout = self.config.wait_timeout();
        for attempt in 1..=self.config.max_attempts {
            match watch.wait(timeout).await {
                Ok(true) => {
                    if self.mark_reached(start).await {
                        tracing::debug!(attempt, start, "Journal sync observed");
                        return SyncOutcome::Synced;
                    }
                }
                Ok(false) => {
                    tracing::info!(
                        timeout_secs = self.config.wait_timeout_secs,
                        "No journal sync within timeout"
                    );
                    return SyncOutcome::TimedOut;
                }
                Err(err) => {
                    tracing::error!("Journal change watch failed: {}", err);
                    return SyncOutcome::Unavailable;
                }
            }
        }

        tracing::info!(
            attempts = self.config.max_attempts,
            "Giving up waiting for journal sync"
        );
        SyncOutcome::GaveUp
    }

    async fn mark_reached(&self, start: SyncMark) -> bool {
        matches!(self.store.sync_mark().await, Some(mark) if mark >= start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// What one `ChangeWatch::wait` call should do
    enum WaitScript {
        /// Event right away, optionally moving the mark
        Event(Option<SyncMark>),
        /// Event at the very end of the wait window, optionally moving the mark
        SlowEvent(Option<SyncMark>),
        /// Full wait window with no event
        Timeout,
        /// Watch breaks
        Fail,
    }

    struct FakeStore {
        now: SyncMark,
        mark: Arc<Mutex<Option<SyncMark>>>,
        script: Arc<Mutex<VecDeque<WaitScript>>>,
        flush_error: bool,
        watch_error: bool,
        flushes: Arc<AtomicU32>,
        watches_opened: Arc<AtomicU32>,
        watches_dropped: Arc<AtomicU32>,
    }

    impl FakeStore {
        fn new(now: SyncMark, mark: Option<SyncMark>) -> Self {
            Self {
                now,
                mark: Arc::new(Mutex::new(mark)),
                script: Arc::new(Mutex::new(VecDeque::new())),
                flush_error: false,
                watch_error: false,
                flushes: Arc::new(AtomicU32::new(0)),
                watches_opened: Arc::new(AtomicU32::new(0)),
                watches_dropped: Arc::new(AtomicU32::new(0)),
            }
        }

        fn with_script(self, script: Vec<WaitScript>) -> Self {
            *self.script.lock().unwrap() = script.into();
            self
        }

        fn with_flush_error(mut self) -> Self {
            self.flush_error = true;
            self
        }

        fn with_watch_error(mut self) -> Self {
            self.watch_error = true;
            self
        }
    }

    #[async_trait]
    impl StoreControl for FakeStore {
        fn now(&self) -> SyncMark {
            self.now
        }

        async fn sync_mark(&self) -> Option<SyncMark> {
            *self.mark.lock().unwrap()
        }

        async fn request_flush(&self) -> Result<()> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            if self.flush_error {
                return Err(Error::store("flush command exited with 1"));
            }
            Ok(())
        }

        async fn watch(&self) -> Result<Box<dyn ChangeWatch>> {
            if self.watch_error {
                return Err(Error::store("inotify init failed"));
            }
            self.watches_opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeWatch {
                mark: self.mark.clone(),
                script: self.script.clone(),
                dropped: self.watches_dropped.clone(),
            }))
        }
    }

    struct FakeWatch {
        mark: Arc<Mutex<Option<SyncMark>>>,
        script: Arc<Mutex<VecDeque<WaitScript>>>,
        dropped: Arc<AtomicU32>,
    }

    impl Drop for FakeWatch {
        fn drop(&mut self) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ChangeWatch for FakeWatch {
        async fn wait(&mut self, timeout: Duration) -> Result<bool> {
            let step = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(WaitScript::Timeout);
            match step {
                WaitScript::Event(mark) => {
                    if let Some(mark) = mark {
                        *self.mark.lock().unwrap() = Some(mark);
                    }
                    Ok(true)
                }
                WaitScript::SlowEvent(mark) => {
                    tokio::time::sleep(timeout).await;
                    if let Some(mark) = mark {
                        *self.mark.lock().unwrap() = Some(mark);
                    }
                    Ok(true)
                }
                WaitScript::Timeout => {
                    tokio::time::sleep(timeout).await;
                    Ok(false)
                }
                WaitScript::Fail => Err(Error::store("inotify read failed")),
            }
        }
    }

    fn coordinator(store: FakeStore) -> SyncCoordinator<FakeStore> {
        SyncCoordinator::new(store, SyncConfig::default())
    }

    #[tokio::test]
    async fn test_fresh_mark_returns_without_side_effects() {
        let store = FakeStore::new(1000, Some(1000));
        let flushes = store.flushes.clone();
        let opened = store.watches_opened.clone();

        let outcome = coordinator(store).sync().await;

        assert_eq!(outcome, SyncOutcome::AlreadySynced);
        assert!(outcome.is_synced());
        assert_eq!(flushes.load(Ordering::SeqCst), 0);
        assert_eq!(opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_mark_means_not_synced() {
        let store =
            FakeStore::new(1000, None).with_script(vec![WaitScript::Event(Some(1500))]);
        let flushes = store.flushes.clone();

        let outcome = coordinator(store).sync().await;

        assert_eq!(outcome, SyncOutcome::Synced);
        assert_eq!(flushes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_mark_flushes_once_then_syncs() {
        let store = FakeStore::new(1000, Some(400)).with_script(vec![
            // first event is noise in the marker directory, second is the move
            WaitScript::Event(None),
            WaitScript::Event(Some(2000)),
        ]);
        let flushes = store.flushes.clone();
        let opened = store.watches_opened.clone();
        let dropped = store.watches_dropped.clone();

        let outcome = coordinator(store).sync().await;

        assert_eq!(outcome, SyncOutcome::Synced);
        assert_eq!(flushes.load(Ordering::SeqCst), 1);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_flush_failure_abandons_the_attempt() {
        let store = FakeStore::new(1000, None).with_flush_error();
        let opened = store.watches_opened.clone();

        let outcome = coordinator(store).sync().await;

        assert_eq!(outcome, SyncOutcome::Unavailable);
        assert!(!outcome.is_synced());
        assert_eq!(opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_watch_failure_abandons_the_attempt() {
        let store = FakeStore::new(1000, None).with_watch_error();
        let flushes = store.flushes.clone();

        let outcome = coordinator(store).sync().await;

        assert_eq!(outcome, SyncOutcome::Unavailable);
        assert_eq!(flushes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_within_one_wait_window() {
        let store = FakeStore::new(1000, None).with_script(vec![WaitScript::Timeout]);
        let dropped = store.watches_dropped.clone();

        let started = tokio::time::Instant::now();
        let outcome = coordinator(store).sync().await;

        assert_eq!(outcome, SyncOutcome::TimedOut);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_ceiling_bounds_total_wait() {
        // events keep arriving at the end of each window but the mark never
        // reaches the call start
        let store = FakeStore::new(1000, Some(1)).with_script(vec![
            WaitScript::SlowEvent(Some(2)),
            WaitScript::SlowEvent(Some(3)),
            WaitScript::SlowEvent(Some(4)),
        ]);
        let dropped = store.watches_dropped.clone();

        let started = tokio::time::Instant::now();
        let outcome = coordinator(store).sync().await;

        assert_eq!(outcome, SyncOutcome::GaveUp);
        assert_eq!(started.elapsed(), Duration::from_secs(15));
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_failure_releases_the_watch() {
        let store = FakeStore::new(1000, None).with_script(vec![WaitScript::Fail]);
        let opened = store.watches_opened.clone();
        let dropped = store.watches_dropped.clone();

        let outcome = coordinator(store).sync().await;

        assert_eq!(outcome, SyncOutcome::Unavailable);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_event_after_final_window_still_counts() {
        // the third and last event carries the flush completion
        let store = FakeStore::new(1000, Some(1)).with_script(vec![
            WaitScript::Event(None),
            WaitScript::Event(None),
            WaitScript::Event(Some(5000)),
        ]);

        let outcome = coordinator(store).sync().await;

        assert_eq!(outcome, SyncOutcome::Synced);
    }
}
