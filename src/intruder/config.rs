//! Lockout policy configuration.
//!
//! Settings are loaded once at startup and are immutable afterwards. A record
//! type whose threshold or either window is zero is disabled and never tracked.

use std::collections::BTreeMap;
use std::time::Duration;

use super::record::RecordType;

const DEFAULT_SESSION_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_MAX_RECORD_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_CLEANUP_MAX_PER_CYCLE: usize = 1000;

/// Threshold and windows for one record type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordTypeSettings {
    check_count: u32,
    check_duration: Duration,
    reset_duration: Duration,
}

impl RecordTypeSettings {
    #[must_use]
    pub const fn new(check_count: u32, check_duration: Duration, reset_duration: Duration) -> Self {
        Self {
            check_count,
            check_duration,
            reset_duration,
        }
    }

    /// Settings that turn tracking off for a record type.
    #[must_use]
    pub const fn disabled() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.check_count > 0 && !self.check_duration.is_zero() && !self.reset_duration.is_zero()
    }

    #[must_use]
    pub fn check_count(&self) -> u32 {
        self.check_count
    }

    #[must_use]
    pub fn check_duration(&self) -> Duration {
        self.check_duration
    }

    #[must_use]
    pub fn reset_duration(&self) -> Duration {
        self.reset_duration
    }

    /// Defaults per record type: addresses tolerate more noise than identities.
    #[must_use]
    pub const fn default_for(record_type: RecordType) -> Self {
        match record_type {
            RecordType::Address => Self::new(
                10,
                Duration::from_secs(15 * 60),
                Duration::from_secs(60 * 60),
            ),
            RecordType::Username | RecordType::UserDn => Self::new(
                5,
                Duration::from_secs(15 * 60),
                Duration::from_secs(60 * 60),
            ),
            RecordType::Attribute | RecordType::TokenDest => Self::new(
                5,
                Duration::from_secs(30 * 60),
                Duration::from_secs(2 * 60 * 60),
            ),
        }
    }
}

/// Response-delay penalty applied after each recorded attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DelaySettings {
    min_delay: Duration,
    per_attempt: Duration,
    max_jitter: Duration,
    max_delay: Duration,
}

impl DelaySettings {
    /// Default penalty: 100ms base, 50ms per attempt, up to 100ms jitter, 3s cap.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            min_delay: Duration::from_millis(100),
            per_attempt: Duration::from_millis(50),
            max_jitter: Duration::from_millis(100),
            max_delay: Duration::from_millis(3000),
        }
    }

    /// No penalty at all.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            min_delay: Duration::ZERO,
            per_attempt: Duration::ZERO,
            max_jitter: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_min_delay_ms(mut self, ms: u64) -> Self {
        self.min_delay = Duration::from_millis(ms);
        self
    }

    #[must_use]
    pub fn with_per_attempt_ms(mut self, ms: u64) -> Self {
        self.per_attempt = Duration::from_millis(ms);
        self
    }

    #[must_use]
    pub fn with_max_jitter_ms(mut self, ms: u64) -> Self {
        self.max_jitter = Duration::from_millis(ms);
        self
    }

    #[must_use]
    pub fn with_max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay = Duration::from_millis(ms);
        self
    }

    #[must_use]
    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    #[must_use]
    pub fn per_attempt(&self) -> Duration {
        self.per_attempt
    }

    #[must_use]
    pub fn max_jitter(&self) -> Duration {
        self.max_jitter
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

impl Default for DelaySettings {
    fn default() -> Self {
        Self::new()
    }
}

/// Reaper schedule and retention.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CleanupSettings {
    max_record_age: Duration,
    interval: Duration,
    max_per_cycle: usize,
}

impl CleanupSettings {
    /// Default: purge records idle for 7 days, every 5 minutes, 1000 per cycle.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_record_age: DEFAULT_MAX_RECORD_AGE,
            interval: DEFAULT_CLEANUP_INTERVAL,
            max_per_cycle: DEFAULT_CLEANUP_MAX_PER_CYCLE,
        }
    }

    #[must_use]
    pub fn with_max_record_age(mut self, age: Duration) -> Self {
        self.max_record_age = age;
        self
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_per_cycle(mut self, max_per_cycle: usize) -> Self {
        self.max_per_cycle = max_per_cycle;
        self
    }

    /// Clamp zero values so the reaper always makes progress.
    #[must_use]
    pub fn normalize(self) -> Self {
        let interval = if self.interval.is_zero() {
            Duration::from_secs(1)
        } else {
            self.interval
        };
        Self {
            max_record_age: self.max_record_age,
            interval,
            max_per_cycle: self.max_per_cycle.max(1),
        }
    }

    #[must_use]
    pub fn max_record_age(&self) -> Duration {
        self.max_record_age
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn max_per_cycle(&self) -> usize {
        self.max_per_cycle
    }
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self::new()
    }
}

/// Complete engine configuration.
#[derive(Clone, Debug)]
pub struct IntruderConfig {
    record_types: BTreeMap<RecordType, RecordTypeSettings>,
    session_max_attempts: u32,
    delay: DelaySettings,
    cleanup: CleanupSettings,
}

impl IntruderConfig {
    #[must_use]
    pub fn new() -> Self {
        let record_types = RecordType::ALL
            .iter()
            .map(|record_type| (*record_type, RecordTypeSettings::default_for(*record_type)))
            .collect();
        Self {
            record_types,
            session_max_attempts: DEFAULT_SESSION_MAX_ATTEMPTS,
            delay: DelaySettings::new(),
            cleanup: CleanupSettings::new(),
        }
    }

    #[must_use]
    pub fn with_record_type(mut self, record_type: RecordType, settings: RecordTypeSettings) -> Self {
        self.record_types.insert(record_type, settings);
        self
    }

    #[must_use]
    pub fn with_session_max_attempts(mut self, attempts: u32) -> Self {
        self.session_max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: DelaySettings) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn with_cleanup(mut self, cleanup: CleanupSettings) -> Self {
        self.cleanup = cleanup;
        self
    }

    #[must_use]
    pub fn record_type(&self, record_type: RecordType) -> RecordTypeSettings {
        self.record_types
            .get(&record_type)
            .copied()
            .unwrap_or_else(RecordTypeSettings::disabled)
    }

    #[must_use]
    pub fn session_max_attempts(&self) -> u32 {
        self.session_max_attempts
    }

    #[must_use]
    pub fn delay(&self) -> DelaySettings {
        self.delay
    }

    #[must_use]
    pub fn cleanup(&self) -> CleanupSettings {
        self.cleanup
    }

    /// Longest reset window among enabled record types.
    #[must_use]
    pub fn longest_reset(&self) -> Duration {
        self.record_types
            .values()
            .filter(|settings| settings.is_enabled())
            .map(RecordTypeSettings::reset_duration)
            .max()
            .unwrap_or(Duration::ZERO)
    }
}

impl IntruderConfig {
    /// Cleanup settings the reaper actually runs with. Retention is raised to
    /// the longest reset window so a live record, locked or not, is never purged.
    #[must_use]
    pub fn effective_cleanup(&self) -> CleanupSettings {
        let longest_reset = self.longest_reset();
        if self.cleanup.max_record_age() < longest_reset {
            self.cleanup.with_max_record_age(longest_reset)
        } else {
            self.cleanup
        }
    }
}

impl Default for IntruderConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_values_disable_a_record_type() {
        assert!(!RecordTypeSettings::new(0, Duration::from_secs(1), Duration::from_secs(1)).is_enabled());
        assert!(!RecordTypeSettings::new(3, Duration::ZERO, Duration::from_secs(1)).is_enabled());
        assert!(!RecordTypeSettings::new(3, Duration::from_secs(1), Duration::ZERO).is_enabled());
        assert!(RecordTypeSettings::new(3, Duration::from_secs(1), Duration::from_secs(1)).is_enabled());
    }

    #[test]
    fn defaults_enable_every_record_type() {
        let config = IntruderConfig::new();
        for record_type in RecordType::ALL {
            assert!(config.record_type(record_type).is_enabled(), "{record_type}");
        }
        assert_eq!(config.session_max_attempts(), DEFAULT_SESSION_MAX_ATTEMPTS);
    }

    #[test]
    fn longest_reset_ignores_disabled_types() {
        let config = IntruderConfig::new()
            .with_record_type(RecordType::Attribute, RecordTypeSettings::disabled())
            .with_record_type(RecordType::TokenDest, RecordTypeSettings::disabled());
        assert_eq!(config.longest_reset(), Duration::from_secs(60 * 60));
    }

    #[test]
    fn retention_never_undercuts_a_reset_window() {
        let config = IntruderConfig::new()
            .with_record_type(
                RecordType::Username,
                RecordTypeSettings::new(3, Duration::from_secs(60), Duration::from_secs(3 * 60 * 60)),
            )
            .with_cleanup(CleanupSettings::new().with_max_record_age(Duration::from_secs(30)));
        assert_eq!(
            config.effective_cleanup().max_record_age(),
            Duration::from_secs(3 * 60 * 60)
        );

        let generous = config
            .clone()
            .with_cleanup(CleanupSettings::new().with_max_record_age(Duration::from_secs(86_400)));
        assert_eq!(
            generous.effective_cleanup().max_record_age(),
            Duration::from_secs(86_400)
        );
    }

    #[test]
    fn cleanup_normalize_clamps_zero_values() {
        let cleanup = CleanupSettings::new()
            .with_interval(Duration::ZERO)
            .with_max_per_cycle(0)
            .normalize();
        assert_eq!(cleanup.interval(), Duration::from_secs(1));
        assert_eq!(cleanup.max_per_cycle(), 1);
    }

    #[test]
    fn delay_builder_sets_values() {
        let delay = DelaySettings::none()
            .with_min_delay_ms(100)
            .with_per_attempt_ms(50)
            .with_max_jitter_ms(50)
            .with_max_delay_ms(1000);
        assert_eq!(delay.min_delay(), Duration::from_millis(100));
        assert_eq!(delay.per_attempt(), Duration::from_millis(50));
        assert_eq!(delay.max_jitter(), Duration::from_millis(50));
        assert_eq!(delay.max_delay(), Duration::from_millis(1000));
    }
}
