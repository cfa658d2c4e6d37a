//! Integration points fired on the first lockout of an episode.
//!
//! Delivery (email, SMS, event persistence) lives outside the engine. Hooks are
//! fire-and-forget from the engine's point of view: an error is logged and
//! counted but never changes a check or mark outcome.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use super::record::{IntruderRecord, RecordType};
use crate::storage::BoxFuture;

/// Notified once when a subject becomes locked.
pub trait IntruderAlert: Send + Sync {
    fn alert_intruder<'a>(
        &'a self,
        record: &'a IntruderRecord,
        age: Duration,
    ) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Audit trail entry for a lockout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LockoutEvent {
    pub record_type: RecordType,
    pub subject: String,
    pub attempts: u32,
    pub last_attempt: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
}

impl LockoutEvent {
    #[must_use]
    pub fn from_record(record: &IntruderRecord, detected_at: DateTime<Utc>) -> Self {
        Self {
            record_type: record.record_type,
            subject: record.subject.clone(),
            attempts: record.attempts,
            last_attempt: record.timestamp,
            detected_at,
        }
    }
}

pub trait IntruderAudit: Send + Sync {
    fn record_lockout<'a>(&'a self, event: &'a LockoutEvent) -> BoxFuture<'a, ()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LogIntruderAlert;

impl IntruderAlert for LogIntruderAlert {
    fn alert_intruder<'a>(
        &'a self,
        record: &'a IntruderRecord,
        age: Duration,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            warn!(
                record_type = %record.record_type,
                subject = %record.subject,
                attempts = record.attempts,
                age_secs = age.as_secs(),
                "intruder lockout"
            );
            Ok(())
        })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LogIntruderAudit;

impl IntruderAudit for LogIntruderAudit {
    fn record_lockout<'a>(&'a self, event: &'a LockoutEvent) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            match serde_json::to_string(event) {
                Ok(json) => info!(event = %json, "intruder lockout audit"),
                Err(err) => warn!("failed to encode lockout audit event: {err}"),
            }
        })
    }
}
