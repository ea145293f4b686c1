//! Exponential backoff for rate-limited generation calls

use crate::config::GeneratorConfig;
use std::time::Duration;

/// Backoff configuration. `max_attempts` counts every provider call,
/// the first one included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&GeneratorConfig::default())
    }
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &GeneratorConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.initial_retry_delay_ms),
            Duration::from_millis(config.max_retry_delay_ms),
        )
    }

    /// Delay after the failed attempt with index `attempt` (0-based):
    /// `min(initial * 2^attempt, max)`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Sum of the delays slept before attempt `retries` (i.e. after `retries` failures).
    #[must_use]
    pub fn total_delay(&self, retries: u32) -> Duration {
        (0..retries).map(|a| self.delay_for_attempt(a)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(5, Duration::from_millis(1000), Duration::from_millis(32_000))
    }

    #[rstest]
    #[case(0, 1000)]
    #[case(1, 2000)]
    #[case(2, 4000)]
    #[case(4, 16_000)]
    #[case(5, 32_000)]
    #[case(6, 32_000)]
    #[case(40, 32_000)]
    fn test_delay_sequence(#[case] attempt: u32, #[case] expected_ms: u64) {
        assert_eq!(policy().delay_for_attempt(attempt), Duration::from_millis(expected_ms));
    }

    #[test]
    fn test_total_delay() {
        assert_eq!(policy().total_delay(0), Duration::ZERO);
        assert_eq!(policy().total_delay(3), Duration::from_millis(7000));
    }

    #[test]
    fn test_default_matches_generator_defaults() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(32));
    }
}
