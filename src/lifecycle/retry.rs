//! Retry and backoff policy.

use std::time::Duration;

/// How the delay between attempts grows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backoff {
    /// The same delay before every attempt.
    Fixed,
    /// `retry_delay × attempt` (attempt is 1-based).
    Linear,
}

/// Explicit, configurable retry policy.
///
/// The backoff formula is a policy parameter, not a hard-coded constant:
/// the default is linear (`retry_delay × attempt`).
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Failed attempts after which the transaction goes terminal `failed`.
    pub max_retries: u32,

    /// Base delay between attempts.
    pub retry_delay: Duration,

    /// Growth curve for the delay.
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            backoff: Backoff::Linear,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, given how many have failed so far.
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.retry_delay,
            Backoff::Linear => self.retry_delay * failed_attempts.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff_scales_with_attempt() {
        let policy = RetryPolicy {
            max_retries: 3,
            retry_delay: Duration::from_millis(5000),
            backoff: Backoff::Linear,
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(5000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(10000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(15000));
    }

    #[test]
    fn test_fixed_backoff_is_flat() {
        let policy = RetryPolicy {
            max_retries: 5,
            retry_delay: Duration::from_millis(100),
            backoff: Backoff::Fixed,
        };

        assert_eq!(policy.delay_for(1), policy.delay_for(4));
    }
}
