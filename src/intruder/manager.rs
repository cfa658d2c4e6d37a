//! Per-record-type sliding-window counting.
//!
//! A subject is derived into one of three states on every read: untracked (no
//! live record), watching (live, below threshold or outside the check window),
//! or locked. Reset is lazy: a record idle for `reset_duration` reads as absent
//! and the next mark starts a new episode.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::clock::Clock;
use super::config::RecordTypeSettings;
use super::record::{IntruderRecord, RecordType};
use crate::storage::{BoxFuture, RecordStore, StorageError};

const LOCK_STRIPES: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Idle past the reset window; the next mark starts over.
    Expired,
    Watching,
    Locked,
}

/// Classify a stored record against its type's settings at `now`.
#[must_use]
pub fn classify(
    settings: &RecordTypeSettings,
    record: &IntruderRecord,
    now: DateTime<Utc>,
) -> RecordStatus {
    let age = record.age(now);
    if age >= settings.reset_duration() {
        RecordStatus::Expired
    } else if record.attempts >= settings.check_count() && age < settings.check_duration() {
        RecordStatus::Locked
    } else {
        RecordStatus::Watching
    }
}

/// Counting and lock decision for one record type.
pub trait RecordManager: Send + Sync {
    fn record_type(&self) -> RecordType;

    fn settings(&self) -> RecordTypeSettings;

    /// Pure read. Storage failures read as "not locked".
    fn check_subject<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, bool>;

    /// Register a failed attempt and return the stored record, or `None` when
    /// the type is not tracked.
    fn mark_subject<'a>(
        &'a self,
        subject: &'a str,
    ) -> BoxFuture<'a, Result<Option<IntruderRecord>, StorageError>>;

    fn clear_subject<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<(), StorageError>>;

    fn is_alerted<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, bool>;

    /// Flag the current lock episode as alerted. Returns the record only when
    /// this call performed the transition, so exactly one caller alerts.
    fn mark_alerted<'a>(
        &'a self,
        subject: &'a str,
    ) -> BoxFuture<'a, Result<Option<IntruderRecord>, StorageError>>;

    /// Live record for the subject, `None` when untracked or expired.
    fn read_subject<'a>(
        &'a self,
        subject: &'a str,
    ) -> BoxFuture<'a, Result<Option<IntruderRecord>, StorageError>>;
}

struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

impl KeyLocks {
    fn new() -> Self {
        Self {
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    async fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let stripes = self.stripes.len() as u64;
        let index = usize::try_from(hasher.finish() % stripes).unwrap_or(0);
        self.stripes[index].lock().await
    }
}

/// Store-backed manager used for every enabled record type.
pub struct StoredRecordManager {
    record_type: RecordType,
    settings: RecordTypeSettings,
    store: RecordStore,
    clock: Arc<dyn Clock>,
    locks: KeyLocks,
}

impl std::fmt::Debug for StoredRecordManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredRecordManager")
            .field("record_type", &self.record_type)
            .field("settings", &self.settings)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl StoredRecordManager {
    #[must_use]
    pub fn new(
        record_type: RecordType,
        settings: RecordTypeSettings,
        store: RecordStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            record_type,
            settings,
            store,
            clock,
            locks: KeyLocks::new(),
        }
    }

    fn key(&self, subject: &str) -> String {
        RecordStore::key_for(self.record_type, subject)
    }

    async fn read_live(&self, key: &str) -> Result<Option<IntruderRecord>, StorageError> {
        let now = self.clock.now();
        Ok(self
            .store
            .read(key)
            .await?
            .filter(|record| classify(&self.settings, record, now) != RecordStatus::Expired))
    }
}

impl RecordManager for StoredRecordManager {
    fn record_type(&self) -> RecordType {
        self.record_type
    }

    fn settings(&self) -> RecordTypeSettings {
        self.settings
    }

    fn check_subject<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let key = self.key(subject);
            match self.store.read(&key).await {
                Ok(Some(record)) => {
                    classify(&self.settings, &record, self.clock.now()) == RecordStatus::Locked
                }
                Ok(None) => false,
                Err(err) => {
                    warn!(
                        record_type = %self.record_type,
                        "intruder check could not read store, treating as not locked: {err}"
                    );
                    false
                }
            }
        })
    }

    fn mark_subject<'a>(
        &'a self,
        subject: &'a str,
    ) -> BoxFuture<'a, Result<Option<IntruderRecord>, StorageError>> {
        Box::pin(async move {
            let key = self.key(subject);
            let _guard = self.locks.lock(&key).await;
            let now = self.clock.now();

            let record = match self.read_live(&key).await? {
                Some(mut record) => {
                    record.touch(now);
                    record
                }
                None => IntruderRecord::first_attempt(self.record_type, subject, now),
            };
            self.store.write(&key, &record).await?;
            debug!(
                record_type = %self.record_type,
                attempts = record.attempts,
                "recorded failed attempt"
            );
            Ok(Some(record))
        })
    }

    fn clear_subject<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let key = self.key(subject);
            let _guard = self.locks.lock(&key).await;
            self.store.remove(&key).await
        })
    }

    fn is_alerted<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            match self.read_live(&self.key(subject)).await {
                Ok(record) => record.is_some_and(|record| record.alerted),
                Err(err) => {
                    warn!(record_type = %self.record_type, "intruder alert flag unreadable: {err}");
                    false
                }
            }
        })
    }

    fn mark_alerted<'a>(
        &'a self,
        subject: &'a str,
    ) -> BoxFuture<'a, Result<Option<IntruderRecord>, StorageError>> {
        Box::pin(async move {
            let key = self.key(subject);
            let _guard = self.locks.lock(&key).await;
            let now = self.clock.now();

            let Some(mut record) = self.store.read(&key).await? else {
                return Ok(None);
            };
            if record.alerted || classify(&self.settings, &record, now) != RecordStatus::Locked {
                return Ok(None);
            }
            record.alerted = true;
            self.store.write(&key, &record).await?;
            Ok(Some(record))
        })
    }

    fn read_subject<'a>(
        &'a self,
        subject: &'a str,
    ) -> BoxFuture<'a, Result<Option<IntruderRecord>, StorageError>> {
        Box::pin(async move { self.read_live(&self.key(subject)).await })
    }
}

/// Manager for untracked record types; never touches the store.
#[derive(Clone, Copy, Debug)]
pub struct DisabledRecordManager {
    record_type: RecordType,
}

impl DisabledRecordManager {
    #[must_use]
    pub fn new(record_type: RecordType) -> Self {
        Self { record_type }
    }
}

impl RecordManager for DisabledRecordManager {
    fn record_type(&self) -> RecordType {
        self.record_type
    }

    fn settings(&self) -> RecordTypeSettings {
        RecordTypeSettings::disabled()
    }

    fn check_subject<'a>(&'a self, _subject: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async { false })
    }

    fn mark_subject<'a>(
        &'a self,
        _subject: &'a str,
    ) -> BoxFuture<'a, Result<Option<IntruderRecord>, StorageError>> {
        Box::pin(async { Ok(None) })
    }

    fn clear_subject<'a>(&'a self, _subject: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async { Ok(()) })
    }

    fn is_alerted<'a>(&'a self, _subject: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async { false })
    }

    fn mark_alerted<'a>(
        &'a self,
        _subject: &'a str,
    ) -> BoxFuture<'a, Result<Option<IntruderRecord>, StorageError>> {
        Box::pin(async { Ok(None) })
    }

    fn read_subject<'a>(
        &'a self,
        _subject: &'a str,
    ) -> BoxFuture<'a, Result<Option<IntruderRecord>, StorageError>> {
        Box::pin(async { Ok(None) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::intruder::clock::ManualClock;
    use crate::storage::{KeyValueBackend, MemoryBackend};
    use chrono::TimeZone;
    use std::time::Duration;

    fn settings() -> RecordTypeSettings {
        RecordTypeSettings::new(3, Duration::from_secs(60), Duration::from_secs(600))
    }

    fn manager() -> (Arc<ManualClock>, Arc<MemoryBackend>, StoredRecordManager) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap(),
        ));
        let backend = Arc::new(MemoryBackend::new());
        let manager = StoredRecordManager::new(
            RecordType::Username,
            settings(),
            RecordStore::new(backend.clone()),
            clock.clone(),
        );
        (clock, backend, manager)
    }

    #[tokio::test]
    async fn locks_at_threshold_and_unlocks_after_check_window() -> anyhow::Result<()> {
        let (clock, _, manager) = manager();
        for expected in 1..=2 {
            let record = manager.mark_subject("alice").await?.unwrap();
            assert_eq!(record.attempts, expected);
            assert!(!manager.check_subject("alice").await);
        }
        manager.mark_subject("alice").await?;
        assert!(manager.check_subject("alice").await);

        clock.advance(Duration::from_secs(61));
        assert!(!manager.check_subject("alice").await);
        // Still watching: the reset window has not elapsed.
        assert_eq!(manager.read_subject("alice").await?.unwrap().attempts, 3);
        Ok(())
    }

    #[tokio::test]
    async fn touching_a_locked_subject_extends_the_lock() -> anyhow::Result<()> {
        let (clock, _, manager) = manager();
        for _ in 0..3 {
            manager.mark_subject("alice").await?;
        }
        clock.advance(Duration::from_secs(50));
        manager.mark_subject("alice").await?;
        clock.advance(Duration::from_secs(50));
        assert!(manager.check_subject("alice").await);
        Ok(())
    }

    #[tokio::test]
    async fn reset_window_starts_a_new_episode() -> anyhow::Result<()> {
        let (clock, _, manager) = manager();
        for _ in 0..3 {
            manager.mark_subject("alice").await?;
        }
        assert!(manager.mark_alerted("alice").await?.is_some());

        clock.advance(Duration::from_secs(601));
        assert_eq!(manager.read_subject("alice").await?, None);

        let record = manager.mark_subject("alice").await?.unwrap();
        assert_eq!(record.attempts, 1);
        assert!(!record.alerted);
        Ok(())
    }

    #[tokio::test]
    async fn mark_alerted_transitions_once() -> anyhow::Result<()> {
        let (_, _, manager) = manager();
        manager.mark_subject("alice").await?;
        // Not locked yet, nothing to alert.
        assert!(manager.mark_alerted("alice").await?.is_none());

        manager.mark_subject("alice").await?;
        manager.mark_subject("alice").await?;
        assert!(!manager.is_alerted("alice").await);
        assert!(manager.mark_alerted("alice").await?.is_some());
        assert!(manager.mark_alerted("alice").await?.is_none());
        assert!(manager.is_alerted("alice").await);
        Ok(())
    }

    #[tokio::test]
    async fn clear_removes_the_record() -> anyhow::Result<()> {
        let (_, backend, manager) = manager();
        for _ in 0..3 {
            manager.mark_subject("alice").await?;
        }
        manager.clear_subject("alice").await?;
        assert!(!manager.check_subject("alice").await);
        assert!(backend.is_empty().await);
        // Clearing an untracked subject is fine.
        manager.clear_subject("bob").await?;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_marks_are_not_lost() -> anyhow::Result<()> {
        let (_, _, manager) = manager();
        let manager = Arc::new(manager);
        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.mark_subject("alice").await })
            })
            .collect();
        for task in tasks {
            task.await??;
        }
        assert_eq!(manager.read_subject("alice").await?.unwrap().attempts, 50);
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_store_fails_open_on_check() -> anyhow::Result<()> {
        struct Unreadable;

        impl KeyValueBackend for Unreadable {
            fn name(&self) -> &'static str {
                "unreadable"
            }
            fn get<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<Option<String>, StorageError>> {
                Box::pin(async { Err(StorageError::operation("SELECT", "io error")) })
            }
            fn put<'a>(&'a self, _key: &'a str, _value: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
                Box::pin(async { Ok(()) })
            }
            fn remove<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
                Box::pin(async { Ok(()) })
            }
            fn scan<'a>(
                &'a self,
                _after: Option<&'a str>,
                _limit: usize,
            ) -> BoxFuture<'a, Result<Vec<(String, String)>, StorageError>> {
                Box::pin(async { Ok(Vec::new()) })
            }
            fn remove_unchanged<'a>(
                &'a self,
                _entries: &'a [(String, String)],
            ) -> BoxFuture<'a, Result<usize, StorageError>> {
                Box::pin(async { Ok(0) })
            }
        }

        let manager = StoredRecordManager::new(
            RecordType::Address,
            settings(),
            RecordStore::new(Arc::new(Unreadable)),
            Arc::new(ManualClock::new(Utc::now())),
        );
        assert!(!manager.check_subject("203.0.113.5").await);
        assert!(manager.mark_subject("203.0.113.5").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn disabled_manager_is_inert() -> anyhow::Result<()> {
        let manager = DisabledRecordManager::new(RecordType::TokenDest);
        assert_eq!(manager.mark_subject("a@b.tld").await?, None);
        assert!(!manager.check_subject("a@b.tld").await);
        assert!(manager.mark_alerted("a@b.tld").await?.is_none());
        assert!(!manager.settings().is_enabled());
        Ok(())
    }

    #[test]
    fn classify_covers_every_state() {
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();
        let mut record = IntruderRecord::first_attempt(RecordType::Username, "alice", now);
        assert_eq!(classify(&settings(), &record, now), RecordStatus::Watching);
        record.attempts = 3;
        assert_eq!(classify(&settings(), &record, now), RecordStatus::Locked);
        let later = now + chrono::Duration::seconds(600);
        assert_eq!(classify(&settings(), &record, later), RecordStatus::Expired);
    }
}
