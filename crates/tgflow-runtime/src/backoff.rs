//! Exponential backoff state for the poll loop.

use std::time::Duration;

use crate::config::RetryConfig;

/// Delay schedule for consecutive transient failures.
///
/// The first failure waits `initial`, each further one multiplies the delay
/// by `multiplier` up to `max`. Any success resets the schedule. Each poll
/// executor owns its own instance.
///
/// With a retry limit of `n`, the schedule is exhausted once `n + 1`
/// consecutive failures have been recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    next: Duration,
    failures: u32,
    max_retries: Option<u32>,
}

impl Backoff {
    /// Creates a backoff schedule.
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            multiplier: if multiplier.is_finite() {
                multiplier.max(1.0)
            } else {
                1.0
            },
            next: initial,
            failures: 0,
            max_retries: None,
        }
    }

    /// Limits consecutive retries. `None` retries forever.
    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Returns true once the failures recorded exceed the retry limit.
    pub fn exhausted(&self) -> bool {
        self.max_retries.is_some_and(|max| self.failures > max)
    }

    /// Records a failure and returns how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.failures = self.failures.saturating_add(1);
        self.next = Duration::try_from_secs_f64(delay.as_secs_f64() * self.multiplier)
            .map_or(self.max, |grown| grown.min(self.max));
        delay
    }

    /// Forgets previous failures.
    pub fn reset(&mut self) {
        self.next = self.initial;
        self.failures = 0;
    }

    /// Returns the number of consecutive failures recorded.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Returns the delay the next failure will produce.
    pub fn peek(&self) -> Duration {
        self.next
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for Backoff {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.backoff_multiplier,
        )
        .with_max_retries(config.max_retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_and_caps() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
        assert_eq!(backoff.failures(), 8);
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1), 3.0);
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.peek(), Duration::from_millis(900));

        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_retry_limit() {
        let config = RetryConfig {
            max_retries: Some(2),
            ..Default::default()
        };
        let mut backoff = Backoff::from(&config);

        backoff.next_delay();
        backoff.next_delay();
        assert!(!backoff.exhausted());
        backoff.next_delay();
        assert!(backoff.exhausted());

        backoff.reset();
        assert!(!backoff.exhausted());
        assert!(!Backoff::default().exhausted());
    }

    #[test]
    fn test_degenerate_settings() {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(1), 0.5);
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));

        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10), f64::NAN);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }
}
