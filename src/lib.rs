//! # Intruder (Brute-Force Lockout Engine)
//!
//! `intruder` protects an authentication surface from brute-force and
//! enumeration attacks. It counts failed attempts per subject (username, user
//! DN, source address, `attribute:value` pair, token destination) and locks a
//! subject out once a threshold is reached inside a time window.
//!
//! ## Lockout Model
//!
//! - **Sliding window:** a subject is locked while `attempts >= check_count` and
//!   its last attempt is younger than `check_duration`. Every further failure
//!   refreshes the timestamp, so a subject that keeps failing stays locked.
//! - **Lazy reset:** after `reset_duration` without attempts the record reads as
//!   absent and the next failure starts a new episode.
//! - **Delay penalty:** each failure holds the caller for a randomized,
//!   attempt-proportional delay.
//! - **Alerts:** the first lockout of an episode fires the alert and audit hooks
//!   exactly once.
//!
//! ## Storage & Retention
//!
//! Records live in a pluggable key/value backend: in memory, an embedded
//! `SQLite` file, or `PostgreSQL` shared by several instances. A background
//! reaper purges records idle longer than the retention age, a bounded number
//! per cycle.
//!
//! If the backend cannot be opened at startup the engine fails open: nothing is
//! tracked and every check passes.

pub mod cli;
pub mod intruder;
pub mod storage;

pub use intruder::config::{CleanupSettings, DelaySettings, IntruderConfig, RecordTypeSettings};
pub use intruder::error::IntruderError;
pub use intruder::record::{IntruderRecord, RecordType};
pub use intruder::{IntruderHooks, IntruderManager, RecordReport};
pub use storage::{StorageError, StorageSettings};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }
}
