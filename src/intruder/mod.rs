//! Intruder detection and lockout.
//!
//! [`IntruderManager`] is the single entry point. Callers `check` a subject
//! before processing a credential attempt, `mark` it after a failure, and
//! `clear` it after a success:
//!
//! ```text
//! check(USERNAME, "alice")  -> Ok | Locked
//! mark(USERNAME, "alice")   -> persist attempt, check, delay penalty
//! clear(USERNAME, "alice")  -> forget the subject
//! ```
//!
//! Each record type has its own threshold and windows. A type configured with
//! a zero value, or every type when the store could not be opened at startup,
//! is served by a disabled manager and never locks anything.

pub mod address;
pub mod clock;
pub mod config;
pub mod convenience;
pub mod error;
pub mod hooks;
pub mod manager;
pub mod penalty;
pub mod record;
pub mod stats;

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn, Instrument, Span};

use crate::storage::{
    open_backend, CleanupOutcome, Reaper, ReaperHandle, RecordStore, StorageSettings,
};
use clock::{Clock, SystemClock};
use config::IntruderConfig;
use error::IntruderError;
use hooks::{IntruderAlert, IntruderAudit, LockoutEvent, LogIntruderAlert, LogIntruderAudit};
use manager::{classify, DisabledRecordManager, RecordManager, RecordStatus, StoredRecordManager};
use record::{IntruderRecord, RecordType};
use stats::{IntruderStats, StatsSnapshot};

/// Upper bound on a single alert or audit hook call.
const HOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Alert and audit integrations.
#[derive(Clone)]
pub struct IntruderHooks {
    alert: Arc<dyn IntruderAlert>,
    audit: Arc<dyn IntruderAudit>,
}

impl IntruderHooks {
    #[must_use]
    pub fn with_alert(mut self, alert: Arc<dyn IntruderAlert>) -> Self {
        self.alert = alert;
        self
    }

    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn IntruderAudit>) -> Self {
        self.audit = audit;
        self
    }
}

impl Default for IntruderHooks {
    fn default() -> Self {
        Self {
            alert: Arc::new(LogIntruderAlert),
            audit: Arc::new(LogIntruderAudit),
        }
    }
}

impl std::fmt::Debug for IntruderHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntruderHooks").finish_non_exhaustive()
    }
}

/// A stored record with its derived state, for operators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RecordReport {
    #[serde(flatten)]
    pub record: IntruderRecord,
    pub status: RecordStatus,
    pub age_secs: u64,
}

pub struct IntruderManager {
    config: IntruderConfig,
    managers: BTreeMap<RecordType, Arc<dyn RecordManager>>,
    store: Option<RecordStore>,
    reaper: Option<Arc<Reaper>>,
    reaper_handle: Mutex<Option<ReaperHandle>>,
    hooks: IntruderHooks,
    clock: Arc<dyn Clock>,
    stats: Arc<IntruderStats>,
    hook_tasks: std::sync::Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for IntruderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntruderManager")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl IntruderManager {
    /// Open the configured backend and build the engine.
    ///
    /// An unreachable backend does not fail startup: the engine runs with every
    /// record type disabled.
    pub async fn open(
        config: IntruderConfig,
        storage: &StorageSettings,
        hooks: IntruderHooks,
    ) -> Self {
        let store = match open_backend(storage).await {
            Ok(backend) => Some(RecordStore::new(backend)),
            Err(err) => {
                warn!(
                    backend = storage.kind(),
                    "intruder store unavailable, lockout tracking disabled: {err}"
                );
                None
            }
        };
        Self::new(config, store, hooks, Arc::new(SystemClock))
    }

    /// Build the engine over an already opened store. `None` disables every
    /// record type.
    #[must_use]
    pub fn new(
        config: IntruderConfig,
        store: Option<RecordStore>,
        hooks: IntruderHooks,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let managers = RecordType::ALL
            .iter()
            .map(|&record_type| {
                let settings = config.record_type(record_type);
                let manager: Arc<dyn RecordManager> = match &store {
                    Some(store) if settings.is_enabled() => Arc::new(StoredRecordManager::new(
                        record_type,
                        settings,
                        store.clone(),
                        Arc::clone(&clock),
                    )),
                    _ => Arc::new(DisabledRecordManager::new(record_type)),
                };
                (record_type, manager)
            })
            .collect();

        let cleanup = config.effective_cleanup();
        if cleanup.max_record_age() > config.cleanup().max_record_age() {
            warn!(
                configured_secs = config.cleanup().max_record_age().as_secs(),
                effective_secs = cleanup.max_record_age().as_secs(),
                "record retention is shorter than a reset window, raising it"
            );
        }
        let reaper = store
            .as_ref()
            .map(|store| Arc::new(Reaper::new(store.clone(), cleanup, Arc::clone(&clock))));

        Self {
            config,
            managers,
            store,
            reaper,
            reaper_handle: Mutex::new(None),
            hooks,
            clock,
            stats: Arc::new(IntruderStats::default()),
            hook_tasks: std::sync::Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn config(&self) -> &IntruderConfig {
        &self.config
    }

    /// Name of the active backend, `None` when running disabled.
    #[must_use]
    pub fn backend_name(&self) -> Option<&'static str> {
        self.store.as_ref().map(RecordStore::backend_name)
    }

    #[must_use]
    pub fn is_tracking(&self, record_type: RecordType) -> bool {
        self.manager(record_type).settings().is_enabled()
    }

    fn manager(&self, record_type: RecordType) -> Arc<dyn RecordManager> {
        self.managers
            .get(&record_type)
            .cloned()
            .unwrap_or_else(|| Arc::new(DisabledRecordManager::new(record_type)))
    }

    /// Start the background reaper on the current runtime. Idempotent.
    pub async fn start(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let Some(reaper) = &self.reaper else {
            debug!("no intruder store, reaper not started");
            return;
        };
        let mut handle = self.reaper_handle.lock().await;
        if handle.is_none() && !self.closed.load(Ordering::Acquire) {
            info!(
                interval_secs = reaper.settings().interval().as_secs(),
                max_record_age_secs = reaper.settings().max_record_age().as_secs(),
                "starting intruder reaper"
            );
            *handle = Some(reaper.spawn());
        }
    }

    /// Stop the reaper, wait for it and for in-flight hooks. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(reaper) = &self.reaper {
            reaper.close();
        }
        if let Some(handle) = self.reaper_handle.lock().await.take() {
            handle.stop().await;
        }
        self.flush_hooks().await;
        info!("intruder manager closed");
    }

    /// Wait for alert and audit hooks already dispatched. Each is bounded by
    /// its own timeout.
    pub async fn flush_hooks(&self) {
        let mut pending = std::mem::take(
            &mut *self
                .hook_tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        while let Some(joined) = pending.join_next().await {
            if let Err(err) = joined {
                warn!("intruder hook task failed: {err}");
            }
        }
    }

    /// Run one cleanup cycle now, ignoring the schedule.
    ///
    /// # Errors
    /// Returns `Operational` if the store scan or delete fails.
    pub async fn purge_now(&self) -> Result<CleanupOutcome, IntruderError> {
        match &self.reaper {
            Some(reaper) => Ok(reaper.run_forced().await?),
            None => Ok(CleanupOutcome::default()),
        }
    }

    /// Fail with `Locked` if the subject is currently locked out.
    ///
    /// # Errors
    /// Returns `IntruderError::Locked` when the subject is locked.
    #[instrument(skip_all, fields(record_type = %record_type))]
    pub async fn check(&self, record_type: RecordType, subject: &str) -> Result<(), IntruderError> {
        if subject.trim().is_empty() {
            return Ok(());
        }
        let manager = self.manager(record_type);
        if !manager.check_subject(subject).await {
            return Ok(());
        }
        self.alert_first_lockout(manager.as_ref(), subject).await;
        Err(IntruderError::Locked {
            record_type,
            subject: subject.to_string(),
        })
    }

    /// Record a failed attempt, then check and apply the delay penalty.
    ///
    /// Local addresses are never tracked. The penalty is applied whether or not
    /// the subject ended up locked.
    ///
    /// # Errors
    /// Returns `Locked` when the subject is now locked, or `Operational` if the
    /// attempt could not be persisted.
    #[instrument(skip_all, fields(record_type = %record_type))]
    pub async fn mark(&self, record_type: RecordType, subject: &str) -> Result<(), IntruderError> {
        if subject.trim().is_empty() {
            return Ok(());
        }
        if record_type == RecordType::Address && address::is_local_address(subject) {
            debug!("ignoring failed attempt from local address");
            return Ok(());
        }

        let Some(record) = self.manager(record_type).mark_subject(subject).await? else {
            return Ok(());
        };
        self.stats.record_attempt();

        let outcome = self.check(record_type, subject).await;
        penalty::apply(penalty::random_delay(&self.config.delay(), record.attempts)).await;
        outcome
    }

    /// Forget a subject.
    ///
    /// # Errors
    /// Returns `Operational` if the record cannot be removed.
    #[instrument(skip_all, fields(record_type = %record_type))]
    pub async fn clear(&self, record_type: RecordType, subject: &str) -> Result<(), IntruderError> {
        if subject.trim().is_empty() {
            return Ok(());
        }
        let manager = self.manager(record_type);
        if !manager.settings().is_enabled() {
            return Ok(());
        }
        manager.clear_subject(subject).await?;
        self.stats.record_clear();
        Ok(())
    }

    async fn alert_first_lockout(&self, manager: &dyn RecordManager, subject: &str) {
        let record = match manager.mark_alerted(subject).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(err) => {
                warn!("could not persist intruder alert flag: {err}");
                return;
            }
        };

        self.stats.record_lockout();
        let now = self.clock.now();
        let age = record.age(now);
        let event = LockoutEvent::from_record(&record, now);
        let hooks = self.hooks.clone();
        let stats = Arc::clone(&self.stats);

        // Hooks never run on the caller's task.
        let dispatch = async move {
            match timeout(HOOK_TIMEOUT, hooks.alert.alert_intruder(&record, age)).await {
                Ok(Ok(())) => stats.record_alert(),
                Ok(Err(err)) => {
                    stats.record_alert_failure();
                    warn!(record_type = %record.record_type, "intruder alert failed: {err:#}");
                }
                Err(_) => {
                    stats.record_alert_failure();
                    warn!(
                        record_type = %record.record_type,
                        timeout_secs = HOOK_TIMEOUT.as_secs(),
                        "intruder alert timed out"
                    );
                }
            }
            if timeout(HOOK_TIMEOUT, hooks.audit.record_lockout(&event))
                .await
                .is_err()
            {
                warn!(
                    timeout_secs = HOOK_TIMEOUT.as_secs(),
                    "intruder audit hook timed out"
                );
            }
        };

        let mut tasks = self
            .hook_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}
        tasks.spawn(dispatch.instrument(Span::current()));
    }

    /// Current record for a subject with its derived state.
    ///
    /// # Errors
    /// Returns `Operational` if the store read fails.
    pub async fn record(
        &self,
        record_type: RecordType,
        subject: &str,
    ) -> Result<Option<RecordReport>, IntruderError> {
        let manager = self.manager(record_type);
        let Some(record) = manager.read_subject(subject).await? else {
            return Ok(None);
        };
        Ok(Some(self.report(&manager.settings(), record)))
    }

    /// Live records in store order, optionally of one type, at most `limit`.
    ///
    /// # Errors
    /// Returns `Operational` if the store scan fails.
    pub async fn records(
        &self,
        filter: Option<RecordType>,
        limit: usize,
    ) -> Result<Vec<RecordReport>, IntruderError> {
        let Some(store) = &self.store else {
            return Ok(Vec::new());
        };
        let now = self.clock.now();
        let mut reports = Vec::new();
        let mut records = store.records();
        while reports.len() < limit {
            let Some(entry) = records.next().await else {
                break;
            };
            let record = entry?.record;
            if filter.is_some_and(|record_type| record_type != record.record_type) {
                continue;
            }
            let settings = self.manager(record.record_type).settings();
            if classify(&settings, &record, now) == RecordStatus::Expired {
                continue;
            }
            reports.push(self.report(&settings, record));
        }
        Ok(reports)
    }

    fn report(&self, settings: &config::RecordTypeSettings, record: IntruderRecord) -> RecordReport {
        let now = self.clock.now();
        RecordReport {
            status: classify(settings, &record, now),
            age_secs: record.age(now).as_secs(),
            record,
        }
    }

    #[must_use]
    pub fn statistics(&self) -> StatsSnapshot {
        let purged = self.reaper.as_ref().map_or(0, |reaper| reaper.purged_total());
        self.stats.snapshot(purged)
    }
}
