//! Retry policy for failed task executions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Caps the exponential backoff so a large factor cannot stall a run.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum retry attempts after the initial execution.
    pub max_retries: u32,
    /// Base delay before the first retry.
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Multiplier applied to the delay on each subsequent attempt.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-based): `retry_delay *
    /// backoff_factor^(attempt - 1)`, capped at [`MAX_RETRY_DELAY`].
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt.saturating_sub(1) as i32);
        let delay = self.retry_delay.mul_f64(factor);
        delay.min(MAX_RETRY_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_geometrically() {
        let policy = RetryPolicy {
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            retry_delay: Duration::from_secs(30),
            backoff_factor: 10.0,
        };
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(60));
    }

    #[test]
    fn test_factor_below_one_does_not_shrink_delay() {
        let policy = RetryPolicy {
            max_retries: 2,
            retry_delay: Duration::from_millis(100),
            backoff_factor: 0.5,
        };
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(100));
    }
}
