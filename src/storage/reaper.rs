//! Background purge of stale intruder records.
//!
//! Each tick scans the store for records idle longer than the retention age and
//! deletes at most `max_per_cycle` of them; a backlog carries over to the next
//! tick. After a complete scan the oldest surviving timestamp is remembered so
//! later ticks can skip the scan until something could actually be stale. The
//! hint is a local optimisation: other instances writing to the same backend
//! only make it pessimistic, never wrong about what is deleted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use super::{RecordStore, StorageError};
use crate::intruder::clock::Clock;
use crate::intruder::config::CleanupSettings;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CleanupOutcome {
    pub skipped: bool,
    pub aborted: bool,
    pub scanned: usize,
    pub removed: usize,
    pub cap_reached: bool,
}

impl CleanupOutcome {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    fn aborted(scanned: usize) -> Self {
        Self {
            aborted: true,
            scanned,
            ..Self::default()
        }
    }
}

pub struct Reaper {
    store: RecordStore,
    settings: CleanupSettings,
    clock: Arc<dyn Clock>,
    eldest: Mutex<Option<DateTime<Utc>>>,
    closed: AtomicBool,
    purged: AtomicU64,
}

impl std::fmt::Debug for Reaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaper")
            .field("store", &self.store)
            .field("settings", &self.settings)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Reaper {
    #[must_use]
    pub fn new(store: RecordStore, settings: CleanupSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            settings: settings.normalize(),
            clock,
            eldest: Mutex::new(None),
            closed: AtomicBool::new(false),
            purged: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn settings(&self) -> CleanupSettings {
        self.settings
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Total records removed since startup.
    #[must_use]
    pub fn purged_total(&self) -> u64 {
        self.purged.load(Ordering::Relaxed)
    }

    fn eldest_hint(&self) -> Option<DateTime<Utc>> {
        *self.eldest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_eldest_hint(&self, hint: Option<DateTime<Utc>>) {
        *self.eldest.lock().unwrap_or_else(PoisonError::into_inner) = hint;
    }

    /// Run one cleanup cycle.
    ///
    /// # Errors
    /// Returns an error if scanning or deleting fails; the cycle is abandoned.
    pub async fn run_cycle(&self) -> Result<CleanupOutcome, StorageError> {
        if self.is_closed() {
            return Ok(CleanupOutcome::aborted(0));
        }

        let now = self.clock.now();
        let max_age = self.settings.max_record_age();
        let cap = self.settings.max_per_cycle();

        if let Some(eldest) = self.eldest_hint() {
            let eldest_age = now.signed_duration_since(eldest).to_std().unwrap_or_default();
            if eldest_age < max_age {
                debug!(?eldest, "no intruder record can be stale yet, skipping cleanup");
                return Ok(CleanupOutcome::skipped());
            }
        }

        let mut stale = Vec::new();
        let mut scanned = 0;
        let mut oldest_survivor: Option<DateTime<Utc>> = None;
        let mut cap_reached = false;

        let mut records = self.store.records();
        while let Some(entry) = records.next().await {
            let stored = match entry {
                Ok(stored) => stored,
                Err(err) => {
                    self.set_eldest_hint(None);
                    return Err(err);
                }
            };
            scanned += 1;
            if stored.record.age(now) >= max_age {
                stale.push(stored);
                if stale.len() >= cap {
                    cap_reached = true;
                    break;
                }
            } else {
                let timestamp = stored.record.timestamp;
                oldest_survivor = Some(match oldest_survivor {
                    Some(oldest) => oldest.min(timestamp),
                    None => timestamp,
                });
            }
        }
        drop(records);

        if self.is_closed() {
            debug!(scanned, "reaper closed during scan, abandoning cycle");
            return Ok(CleanupOutcome::aborted(scanned));
        }

        // Records marked again since the scan no longer match and are kept.
        let removed = match self.store.remove_all(&stale).await {
            Ok(removed) => removed,
            Err(err) => {
                self.set_eldest_hint(None);
                return Err(err);
            }
        };
        if removed < stale.len() {
            debug!(
                kept = stale.len() - removed,
                "stale intruder records were updated during the scan"
            );
        }
        self.purged
            .fetch_add(u64::try_from(removed).unwrap_or(u64::MAX), Ordering::Relaxed);

        // A capped scan did not see every record, so nothing is known about the rest.
        self.set_eldest_hint(if cap_reached {
            None
        } else {
            Some(oldest_survivor.unwrap_or(now))
        });

        if removed > 0 {
            info!(removed, scanned, cap_reached, "purged stale intruder records");
        }

        Ok(CleanupOutcome {
            skipped: false,
            aborted: false,
            scanned,
            removed,
            cap_reached,
        })
    }

    /// Run one cycle ignoring the eldest-record hint.
    ///
    /// # Errors
    /// Returns an error if scanning or deleting fails.
    pub async fn run_forced(&self) -> Result<CleanupOutcome, StorageError> {
        self.set_eldest_hint(None);
        self.run_cycle().await
    }

    /// Run cycles on the configured interval until the returned handle is stopped.
    pub fn spawn(self: &Arc<Self>) -> ReaperHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let reaper = Arc::clone(self);
        let period = reaper.settings.interval();

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; start purging one period after startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = reaper.run_cycle().await {
                            error!("intruder cleanup cycle failed: {err}");
                        }
                    }
                }
                if reaper.is_closed() {
                    break;
                }
            }
            debug!("intruder reaper stopped");
        });

        ReaperHandle {
            reaper: Arc::clone(self),
            shutdown,
            task,
        }
    }
}

/// Owner of a running reaper task.
#[derive(Debug)]
pub struct ReaperHandle {
    reaper: Arc<Reaper>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Cancel the schedule and wait for an in-flight cycle to notice.
    pub async fn stop(self) {
        self.reaper.close();
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            error!("intruder reaper task failed: {err}");
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::intruder::clock::ManualClock;
    use crate::intruder::record::{IntruderRecord, RecordType};
    use crate::storage::{KeyValueBackend, MemoryBackend};
    use chrono::TimeZone;
    use std::time::Duration;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    struct Fixture {
        backend: Arc<MemoryBackend>,
        store: RecordStore,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let store = RecordStore::new(backend.clone());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        ));
        Fixture {
            backend,
            store,
            clock,
        }
    }

    async fn seed(fixture: &Fixture, prefix: &str, count: usize) -> anyhow::Result<()> {
        for i in 0..count {
            let subject = format!("{prefix}{i}");
            let record =
                IntruderRecord::first_attempt(RecordType::Username, &subject, fixture.clock.now());
            fixture
                .store
                .write(&RecordStore::key_for(RecordType::Username, &subject), &record)
                .await?;
        }
        Ok(())
    }

    fn reaper(fixture: &Fixture, cap: usize) -> Reaper {
        Reaper::new(
            fixture.store.clone(),
            CleanupSettings::new()
                .with_max_record_age(DAY)
                .with_max_per_cycle(cap),
            fixture.clock.clone(),
        )
    }

    #[tokio::test]
    async fn removes_only_stale_records() -> anyhow::Result<()> {
        let fixture = fixture();
        seed(&fixture, "old", 5).await?;
        fixture.clock.advance(DAY + Duration::from_secs(1));
        seed(&fixture, "new", 3).await?;

        let reaper = reaper(&fixture, 100);
        let outcome = reaper.run_cycle().await?;
        assert_eq!(outcome.removed, 5);
        assert_eq!(outcome.scanned, 8);
        assert!(!outcome.cap_reached);
        assert_eq!(fixture.backend.len().await, 3);
        assert_eq!(reaper.purged_total(), 5);
        Ok(())
    }

    #[tokio::test]
    async fn cap_bounds_each_cycle_and_backlog_carries_over() -> anyhow::Result<()> {
        let fixture = fixture();
        seed(&fixture, "old", 10).await?;
        fixture.clock.advance(DAY * 2);
        seed(&fixture, "new", 2).await?;

        let reaper = reaper(&fixture, 4);
        let first = reaper.run_cycle().await?;
        assert_eq!(first.removed, 4);
        assert!(first.cap_reached);

        let second = reaper.run_cycle().await?;
        assert_eq!(second.removed, 4);
        let third = reaper.run_cycle().await?;
        assert_eq!(third.removed, 2);
        assert!(!third.cap_reached);

        assert_eq!(fixture.backend.len().await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn eldest_hint_short_circuits_until_something_can_expire() -> anyhow::Result<()> {
        let fixture = fixture();
        seed(&fixture, "user", 3).await?;

        let reaper = reaper(&fixture, 100);
        let first = reaper.run_cycle().await?;
        assert!(!first.skipped);
        assert_eq!(first.removed, 0);

        fixture.clock.advance(Duration::from_secs(60));
        assert!(reaper.run_cycle().await?.skipped);

        fixture.clock.advance(DAY);
        let expired = reaper.run_cycle().await?;
        assert!(!expired.skipped);
        assert_eq!(expired.removed, 3);
        Ok(())
    }

    #[tokio::test]
    async fn closed_reaper_does_not_delete() -> anyhow::Result<()> {
        let fixture = fixture();
        seed(&fixture, "old", 2).await?;
        fixture.clock.advance(DAY * 3);

        let reaper = reaper(&fixture, 100);
        reaper.close();
        let outcome = reaper.run_cycle().await?;
        assert!(outcome.aborted);
        assert_eq!(fixture.backend.len().await, 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_reaper_purges_and_stops() -> anyhow::Result<()> {
        let fixture = fixture();
        seed(&fixture, "old", 3).await?;
        fixture.clock.advance(DAY * 2);

        let reaper = Arc::new(Reaper::new(
            fixture.store.clone(),
            CleanupSettings::new()
                .with_max_record_age(DAY)
                .with_interval(Duration::from_secs(30)),
            fixture.clock.clone(),
        ));
        let handle = reaper.spawn();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(fixture.backend.len().await, 0);

        handle.stop().await;
        assert!(reaper.is_closed());
        Ok(())
    }

    #[tokio::test]
    async fn records_marked_during_the_scan_survive() -> anyhow::Result<()> {
        use crate::storage::BoxFuture;

        /// Rewrites one record while a scan is in flight, like a concurrent mark.
        struct MarkedDuringScan {
            inner: MemoryBackend,
            key: String,
        }

        impl KeyValueBackend for MarkedDuringScan {
            fn name(&self) -> &'static str {
                "memory"
            }
            fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, StorageError>> {
                self.inner.get(key)
            }
            fn put<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
                self.inner.put(key, value)
            }
            fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
                self.inner.remove(key)
            }
            fn scan<'a>(
                &'a self,
                after: Option<&'a str>,
                limit: usize,
            ) -> BoxFuture<'a, Result<Vec<(String, String)>, StorageError>> {
                Box::pin(async move {
                    let page = self.inner.scan(after, limit).await?;
                    if let Some(value) = self.inner.get(&self.key).await? {
                        let marked = value.replace("\"attempts\":1", "\"attempts\":2");
                        self.inner.put(&self.key, &marked).await?;
                    }
                    Ok(page)
                })
            }
            fn remove_unchanged<'a>(
                &'a self,
                entries: &'a [(String, String)],
            ) -> BoxFuture<'a, Result<usize, StorageError>> {
                self.inner.remove_unchanged(entries)
            }
        }

        let fixture = fixture();
        let key = RecordStore::key_for(RecordType::Username, "old1");
        let backend = Arc::new(MarkedDuringScan {
            inner: MemoryBackend::new(),
            key: key.clone(),
        });
        let store = RecordStore::new(backend.clone());
        for subject in ["old0", "old1", "old2"] {
            let record =
                IntruderRecord::first_attempt(RecordType::Username, subject, fixture.clock.now());
            store
                .write(&RecordStore::key_for(RecordType::Username, subject), &record)
                .await?;
        }
        fixture.clock.advance(DAY * 2);

        let reaper = Reaper::new(
            store.clone(),
            CleanupSettings::new().with_max_record_age(DAY),
            fixture.clock.clone(),
        );
        let outcome = reaper.run_cycle().await?;
        assert_eq!(outcome.scanned, 3);
        assert_eq!(outcome.removed, 2);
        assert_eq!(reaper.purged_total(), 2);
        assert_eq!(backend.inner.len().await, 1);
        assert_eq!(store.read(&key).await?.map(|record| record.attempts), Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn backend_errors_abandon_the_cycle() -> anyhow::Result<()> {
        struct BrokenScan;

        impl KeyValueBackend for BrokenScan {
            fn name(&self) -> &'static str {
                "broken"
            }
            fn get<'a>(
                &'a self,
                _key: &'a str,
            ) -> crate::storage::BoxFuture<'a, Result<Option<String>, StorageError>> {
                Box::pin(async { Ok(None) })
            }
            fn put<'a>(
                &'a self,
                _key: &'a str,
                _value: &'a str,
            ) -> crate::storage::BoxFuture<'a, Result<(), StorageError>> {
                Box::pin(async { Ok(()) })
            }
            fn remove<'a>(
                &'a self,
                _key: &'a str,
            ) -> crate::storage::BoxFuture<'a, Result<(), StorageError>> {
                Box::pin(async { Ok(()) })
            }
            fn scan<'a>(
                &'a self,
                _after: Option<&'a str>,
                _limit: usize,
            ) -> crate::storage::BoxFuture<'a, Result<Vec<(String, String)>, StorageError>>
            {
                Box::pin(async { Err(StorageError::operation("SELECT", "connection reset")) })
            }
            fn remove_unchanged<'a>(
                &'a self,
                _entries: &'a [(String, String)],
            ) -> crate::storage::BoxFuture<'a, Result<usize, StorageError>> {
                Box::pin(async { Ok(0) })
            }
        }

        let fixture = fixture();
        let reaper = Reaper::new(
            RecordStore::new(Arc::new(BrokenScan)),
            CleanupSettings::new(),
            fixture.clock.clone(),
        );
        assert!(reaper.run_cycle().await.is_err());
        // The failure must not leave a hint behind that would skip the retry.
        assert!(reaper.eldest_hint().is_none());
        Ok(())
    }
}
