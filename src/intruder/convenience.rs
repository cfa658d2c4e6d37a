//! Compound operations used by authentication flows.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

use super::error::IntruderError;
use super::record::RecordType;
use super::IntruderManager;

/// Per-session attempt counter owned by the caller's session object.
pub trait IntruderSession: Send + Sync {
    /// Client address the session was opened from, if known.
    fn source_address(&self) -> Option<&str>;

    fn failed_attempts(&self) -> u32;

    /// Increment and return the new count.
    fn increment_failed_attempts(&self) -> u32;

    fn reset_failed_attempts(&self);
}

/// Minimal in-memory session state.
#[derive(Debug, Default)]
pub struct SessionState {
    source_address: Option<String>,
    failed_attempts: AtomicU32,
}

impl SessionState {
    #[must_use]
    pub fn new(source_address: Option<String>) -> Self {
        Self {
            source_address,
            failed_attempts: AtomicU32::new(0),
        }
    }
}

impl IntruderSession for SessionState {
    fn source_address(&self) -> Option<&str> {
        self.source_address.as_deref()
    }

    fn failed_attempts(&self) -> u32 {
        self.failed_attempts.load(Ordering::Acquire)
    }

    fn increment_failed_attempts(&self) -> u32 {
        self.failed_attempts
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1)
    }

    fn reset_failed_attempts(&self) {
        self.failed_attempts.store(0, Ordering::Release);
    }
}

/// ATTRIBUTE subjects for a submitted form, `"<field>:<value>"` in field-name
/// order. Blank values are skipped.
#[must_use]
pub fn attribute_subjects(form: &BTreeMap<String, String>) -> Vec<String> {
    form.iter()
        .filter(|(field, value)| !field.trim().is_empty() && !value.trim().is_empty())
        .map(|(field, value)| format!("{field}:{value}"))
        .collect()
}

// Run every step, then report the first failure.
fn first_error(results: Vec<Result<(), IntruderError>>) -> Result<(), IntruderError> {
    results.into_iter().collect()
}

impl IntruderManager {
    /// # Errors
    /// Returns `SessionLocked` once the session reached the configured limit.
    pub fn check_session(&self, session: &dyn IntruderSession) -> Result<(), IntruderError> {
        let max = self.config().session_max_attempts();
        if max > 0 && session.failed_attempts() >= max {
            return Err(IntruderError::SessionLocked);
        }
        Ok(())
    }

    /// # Errors
    /// Returns `SessionLocked`, or `Locked` for the session's address.
    pub async fn check_address_and_session(
        &self,
        session: &dyn IntruderSession,
    ) -> Result<(), IntruderError> {
        self.check_session(session)?;
        if let Some(address) = session.source_address() {
            self.check(RecordType::Address, address).await?;
        }
        Ok(())
    }

    /// Count a failed attempt against both the session and its address.
    ///
    /// # Errors
    /// Returns the address mark outcome, or `SessionLocked` once the session
    /// reached its limit.
    pub async fn mark_address_and_session(
        &self,
        session: &dyn IntruderSession,
    ) -> Result<(), IntruderError> {
        let attempts = session.increment_failed_attempts();
        debug!(attempts, "session failed attempt");
        if let Some(address) = session.source_address() {
            self.mark(RecordType::Address, address).await?;
        }
        self.check_session(session)
    }

    /// # Errors
    /// Returns `Operational` if the address record cannot be removed.
    pub async fn clear_address_and_session(
        &self,
        session: &dyn IntruderSession,
    ) -> Result<(), IntruderError> {
        session.reset_failed_attempts();
        if let Some(address) = session.source_address() {
            self.clear(RecordType::Address, address).await?;
        }
        Ok(())
    }

    /// # Errors
    /// Returns `Locked` for the first locked attribute in field-name order.
    pub async fn check_attributes(
        &self,
        form: &BTreeMap<String, String>,
    ) -> Result<(), IntruderError> {
        for subject in attribute_subjects(form) {
            self.check(RecordType::Attribute, &subject).await?;
        }
        Ok(())
    }

    /// Every attribute is marked even if an earlier one is locked.
    ///
    /// # Errors
    /// Returns the first failing outcome in field-name order.
    pub async fn mark_attributes(
        &self,
        form: &BTreeMap<String, String>,
    ) -> Result<(), IntruderError> {
        let mut results = Vec::new();
        for subject in attribute_subjects(form) {
            results.push(self.mark(RecordType::Attribute, &subject).await);
        }
        first_error(results)
    }

    /// # Errors
    /// Returns the first `Operational` failure.
    pub async fn clear_attributes(
        &self,
        form: &BTreeMap<String, String>,
    ) -> Result<(), IntruderError> {
        let mut results = Vec::new();
        for subject in attribute_subjects(form) {
            results.push(self.clear(RecordType::Attribute, &subject).await);
        }
        first_error(results)
    }

    /// # Errors
    /// Returns `Locked` if the username or the DN is locked, username first.
    pub async fn check_user(
        &self,
        username: Option<&str>,
        user_dn: Option<&str>,
    ) -> Result<(), IntruderError> {
        if let Some(username) = username {
            self.check(RecordType::Username, username).await?;
        }
        if let Some(user_dn) = user_dn {
            self.check(RecordType::UserDn, user_dn).await?;
        }
        Ok(())
    }

    /// # Errors
    /// Returns the first failing outcome; both subjects are always marked.
    pub async fn mark_user(
        &self,
        username: Option<&str>,
        user_dn: Option<&str>,
    ) -> Result<(), IntruderError> {
        let mut results = Vec::new();
        if let Some(username) = username {
            results.push(self.mark(RecordType::Username, username).await);
        }
        if let Some(user_dn) = user_dn {
            results.push(self.mark(RecordType::UserDn, user_dn).await);
        }
        first_error(results)
    }

    /// # Errors
    /// Returns the first `Operational` failure.
    pub async fn clear_user(
        &self,
        username: Option<&str>,
        user_dn: Option<&str>,
    ) -> Result<(), IntruderError> {
        let mut results = Vec::new();
        if let Some(username) = username {
            results.push(self.clear(RecordType::Username, username).await);
        }
        if let Some(user_dn) = user_dn {
            results.push(self.clear(RecordType::UserDn, user_dn).await);
        }
        first_error(results)
    }

    /// # Errors
    /// Returns `Locked` if the destination is locked.
    pub async fn check_token_destination(&self, destination: &str) -> Result<(), IntruderError> {
        self.check(RecordType::TokenDest, destination).await
    }

    /// # Errors
    /// Returns the mark outcome for the destination.
    pub async fn mark_token_destination(&self, destination: &str) -> Result<(), IntruderError> {
        self.mark(RecordType::TokenDest, destination).await
    }

    /// # Errors
    /// Returns `Operational` if the record cannot be removed.
    pub async fn clear_token_destination(&self, destination: &str) -> Result<(), IntruderError> {
        self.clear(RecordType::TokenDest, destination).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_subjects_are_ordered_and_skip_blanks() {
        let mut form = BTreeMap::new();
        form.insert("mail".to_string(), "a@b.tld".to_string());
        form.insert("cn".to_string(), "Alice".to_string());
        form.insert("phone".to_string(), "  ".to_string());
        assert_eq!(
            attribute_subjects(&form),
            vec!["cn:Alice".to_string(), "mail:a@b.tld".to_string()]
        );
    }

    #[test]
    fn session_state_counts_attempts() {
        let session = SessionState::new(Some("203.0.113.1".to_string()));
        assert_eq!(session.increment_failed_attempts(), 1);
        assert_eq!(session.increment_failed_attempts(), 2);
        assert_eq!(session.failed_attempts(), 2);
        session.reset_failed_attempts();
        assert_eq!(session.failed_attempts(), 0);
        assert_eq!(session.source_address(), Some("203.0.113.1"));
    }
}
