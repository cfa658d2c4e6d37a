//! Response-delay penalty.
//!
//! The delay holds a blocking-pool thread for its whole length. That thread
//! cost per failed attempt is the throttle, so the sleep is deliberately not
//! an async timer and cannot be cancelled once started.

use rand::Rng;
use std::time::Duration;
use tracing::{debug, error};

use super::config::DelaySettings;

/// `min + attempts * per_attempt + jitter`, capped at `max_delay`.
#[must_use]
pub fn compute_delay(settings: &DelaySettings, attempts: u32, jitter: Duration) -> Duration {
    let per_attempt = settings.per_attempt().saturating_mul(attempts);
    settings
        .min_delay()
        .saturating_add(per_attempt)
        .saturating_add(jitter.min(settings.max_jitter()))
        .min(settings.max_delay())
}

/// Same as [`compute_delay`] with jitter drawn uniformly from `0..=max_jitter`.
#[must_use]
pub fn random_delay(settings: &DelaySettings, attempts: u32) -> Duration {
    let max_jitter_ms = u64::try_from(settings.max_jitter().as_millis()).unwrap_or(u64::MAX);
    let jitter = if max_jitter_ms == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter_ms))
    };
    compute_delay(settings, attempts, jitter)
}

/// Hold the caller for `delay`.
pub async fn apply(delay: Duration) {
    if delay.is_zero() {
        return;
    }
    debug!(delay_ms = delay.as_millis(), "applying intruder delay penalty");
    if let Err(err) = tokio::task::spawn_blocking(move || std::thread::sleep(delay)).await {
        error!("intruder delay task failed: {err}");
    }
}
