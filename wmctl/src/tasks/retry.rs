//! Retry policies for background jobs.

use std::fmt::Debug;
use std::time::Duration;

/// Decides whether and when a transiently failed job runs again.
pub trait RetryPolicy: Send + Sync + Debug {
    /// Delay before retry number `retry` (0 for the first retry), or `None` to
    /// give up.
    fn next_delay(&self, retry: u32) -> Option<Duration>;
}

/// The same delay before every retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    pub delay: Duration,
    pub max_retries: u32,
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(60),
            max_retries: 3,
        }
    }
}

impl RetryPolicy for FixedDelay {
    fn next_delay(&self, retry: u32) -> Option<Duration> {
        (retry < self.max_retries).then_some(self.delay)
    }
}

/// `backoff * factor^retry`, capped at `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub backoff: Duration,
    pub factor: u32,
    pub max_backoff: Duration,
    pub max_retries: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(1),
            factor: 2,
            max_backoff: Duration::from_secs(60),
            max_retries: 5,
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, retry: u32) -> Option<Duration> {
        if retry >= self.max_retries {
            return None;
        }
        let exponential = self.backoff.saturating_mul(self.factor.saturating_pow(retry));
        Some(exponential.min(self.max_backoff))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay_defaults_to_one_minute() {
        let policy = FixedDelay::default();
        assert_eq!(policy.next_delay(0), Some(Duration::from_secs(60)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_secs(60)));
        assert_eq!(policy.next_delay(3), None);
    }

    #[test]
    fn test_exponential_backoff_grows_and_caps() {
        let policy = ExponentialBackoff {
            backoff: Duration::from_millis(100),
            factor: 2,
            max_backoff: Duration::from_millis(500),
            max_retries: 5,
        };
        let delays: Vec<_> = (0..6).map(|retry| policy.next_delay(retry)).collect();
        assert_eq!(
            delays,
            vec![
                Some(Duration::from_millis(100)),
                Some(Duration::from_millis(200)),
                Some(Duration::from_millis(400)),
                Some(Duration::from_millis(500)),
                Some(Duration::from_millis(500)),
                None,
            ]
        );
    }

    #[test]
    fn test_exponential_backoff_does_not_overflow() {
        let policy = ExponentialBackoff {
            backoff: Duration::from_secs(1),
            factor: 10,
            max_backoff: Duration::from_secs(3600),
            max_retries: 100,
        };
        assert_eq!(policy.next_delay(60), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_zero_retries_never_retries() {
        let policy = FixedDelay {
            delay: Duration::from_secs(1),
            max_retries: 0,
        };
        assert_eq!(policy.next_delay(0), None);
    }
}
