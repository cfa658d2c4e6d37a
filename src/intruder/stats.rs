use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-local counters, reset on restart.
#[derive(Debug, Default)]
pub struct IntruderStats {
    attempts: AtomicU64,
    lockouts: AtomicU64,
    alerts: AtomicU64,
    alert_failures: AtomicU64,
    clears: AtomicU64,
}

impl IntruderStats {
    pub(crate) fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lockout(&self) {
        self.lockouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_alert(&self) {
        self.alerts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_alert_failure(&self) {
        self.alert_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_clear(&self) {
        self.clears.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self, purged: u64) -> StatsSnapshot {
        StatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            lockouts: self.lockouts.load(Ordering::Relaxed),
            alerts: self.alerts.load(Ordering::Relaxed),
            alert_failures: self.alert_failures.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
            purged,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub attempts: u64,
    pub lockouts: u64,
    pub alerts: u64,
    pub alert_failures: u64,
    pub clears: u64,
    pub purged: u64,
}
