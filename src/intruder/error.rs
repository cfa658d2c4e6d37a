//! Outcomes of intruder checks.
//!
//! A lockout is a normal control-flow signal, not a fault: callers match on
//! [`IntruderError::Locked`] to choose user-facing messaging.

use crate::storage::StorageError;

use super::record::RecordType;

#[derive(Debug, thiserror::Error)]
pub enum IntruderError {
    #[error("{record_type} subject is locked out")]
    Locked {
        record_type: RecordType,
        subject: String,
    },
    #[error("session is locked out after too many attempts")]
    SessionLocked,
    #[error("intruder store operation failed: {0}")]
    Operational(#[from] StorageError),
}

impl IntruderError {
    #[must_use]
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. } | Self::SessionLocked)
    }

    /// Address lockouts get a different user message than identity lockouts.
    #[must_use]
    pub fn is_address_lockout(&self) -> bool {
        matches!(
            self,
            Self::Locked {
                record_type: RecordType::Address,
                ..
            }
        )
    }

    #[must_use]
    pub fn record_type(&self) -> Option<RecordType> {
        match self {
            Self::Locked { record_type, .. } => Some(*record_type),
            _ => None,
        }
    }
}
