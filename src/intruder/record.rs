//! Intruder record model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};

/// Classification of a tracked subject. Each type has its own policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordType {
    Address,
    Username,
    UserDn,
    Attribute,
    TokenDest,
}

impl RecordType {
    pub const ALL: [Self; 5] = [
        Self::Address,
        Self::Username,
        Self::UserDn,
        Self::Attribute,
        Self::TokenDest,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Address => "ADDRESS",
            Self::Username => "USERNAME",
            Self::UserDn => "USER_DN",
            Self::Attribute => "ATTRIBUTE",
            Self::TokenDest => "TOKEN_DEST",
        }
    }

    /// Short prefix used in store keys.
    #[must_use]
    pub const fn key_prefix(self) -> &'static str {
        match self {
            Self::Address => "addr",
            Self::Username => "user",
            Self::UserDn => "udn",
            Self::Attribute => "attr",
            Self::TokenDest => "tdst",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "ADDRESS" | "ADDR" | "IP" => Ok(Self::Address),
            "USERNAME" | "USER" => Ok(Self::Username),
            "USER_DN" | "DN" => Ok(Self::UserDn),
            "ATTRIBUTE" | "ATTR" => Ok(Self::Attribute),
            "TOKEN_DEST" | "TOKEN" => Ok(Self::TokenDest),
            other => Err(format!("unknown record type: {other}")),
        }
    }
}

/// Failed-attempt state for one `(record_type, subject)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntruderRecord {
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
    pub attempts: u32,
    #[serde(default)]
    pub alerted: bool,
}

impl IntruderRecord {
    /// A record for the first failed attempt of a subject.
    #[must_use]
    pub fn first_attempt(record_type: RecordType, subject: &str, now: DateTime<Utc>) -> Self {
        Self {
            record_type,
            subject: subject.to_string(),
            timestamp: now,
            attempts: 1,
            alerted: false,
        }
    }

    /// Register another failed attempt at `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.attempts = self.attempts.saturating_add(1);
        self.timestamp = now;
    }

    /// Time elapsed since the most recent attempt. Clock skew clamps to zero.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.timestamp)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}
