//! Configuration types for the membership engine.
use std::time::Duration;

use tokio_retry::strategy::{ExponentialBackoff, jitter};

/// Retry policy of the guarded transactor.
///
/// A read-check-write cycle is attempted at most `max_attempts` times. The
/// pause before retry `n` is drawn uniformly from `[0, base_delay * 2^n)`,
/// capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of read-check-write cycles, including the first one.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl RetryConfig {
    /// Create a retry config with a custom attempt bound.
    pub fn with_max_attempts(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Delays between consecutive attempts; yields `max_attempts - 1` items.
    pub fn strategy(&self) -> impl Iterator<Item = Duration> + use<> {
        let base_millis = self.base_delay.as_millis().max(1) as u64;
        ExponentialBackoff::from_millis(2)
            .factor(base_millis)
            .max_delay(self.max_delay)
            .map(jitter)
            .take(self.max_attempts.saturating_sub(1))
    }
}

/// Configuration of the membership service.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub retry: RetryConfig,
    /// Deadline applied to requests whose caller supplies none.
    pub request_deadline: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            request_deadline: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_deadline(mut self, request_deadline: Duration) -> Self {
        self.request_deadline = request_deadline;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_yields_one_less_than_attempts() {
        let config = RetryConfig::with_max_attempts(5);
        assert_eq!(config.strategy().count(), 4);
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let config = RetryConfig::with_max_attempts(1);
        assert_eq!(config.strategy().count(), 0);
    }

    #[test]
    fn test_delays_are_capped() {
        let config = RetryConfig {
            max_attempts: 20,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        };
        assert!(config.strategy().all(|delay| delay <= Duration::from_millis(50)));
    }
}
