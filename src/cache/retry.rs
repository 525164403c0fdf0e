//! Retry policy with exponential backoff and jitter

use std::time::Duration;

use crate::config::ConfigStore;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Jitter factor (0.0 to 1.0), randomizes delay by +/-(factor * delay)
    pub jitter_factor: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Policy from the `fetch_attempts` and `fetch_backoff_ms` settings
    pub fn from_config(config: &ConfigStore) -> Self {
        Self {
            max_attempts: config.fetch_attempts().max(1),
            initial_delay: config.fetch_backoff(),
            ..Self::default()
        }
    }

    /// Delay before the given attempt (0-indexed)
    ///
    /// Attempt 0 never waits; attempt n waits initial_delay * 2^(n-1),
    /// capped at max_delay, with jitter applied.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 1u32 << (attempt - 1).min(16);
        let capped = self
            .initial_delay
            .saturating_mul(factor)
            .min(self.max_delay);

        if self.jitter_factor <= 0.0 || capped.is_zero() {
            return capped;
        }

        let range_ms = (capped.as_millis() as f64 * self.jitter_factor as f64) as u64;
        let jitter = fastrand::u64(0..=range_ms * 2);
        let base_ms = capped.as_millis() as u64;
        Duration::from_millis(base_ms.saturating_sub(range_ms).saturating_add(jitter))
    }
}
