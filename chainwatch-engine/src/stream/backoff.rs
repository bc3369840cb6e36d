use super::BackoffConfig;
use std::time::Duration;

/// Capped exponential backoff with a retry budget.
///
/// The retry counter is incremented before the delay is computed, so with the
/// default policy consecutive failures wait 2s, 4s, 8s, 16s, 30s and the next
/// failure is terminal.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    retry_count: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            retry_count: 0,
        }
    }

    /// Delay before the next reconnect, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.retry_count >= self.config.max_retries {
            return None;
        }
        self.retry_count += 1;

        let pow = self.retry_count.min(31);
        let base_ms = self.config.base_delay.as_millis().min(u64::MAX as u128) as u64;
        let max_ms = self.config.max_delay.as_millis().min(u64::MAX as u128) as u64;
        let delay_ms = base_ms.saturating_mul(1u64 << pow).min(max_ms);

        Some(Duration::from_millis(delay_ms))
    }

    /// Called after a successful open.
    pub fn reset(&mut self) {
        self.retry_count = 0;
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.config.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let mut backoff = Backoff::new(BackoffConfig::default());

        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay())
            .map(|delay| delay.as_millis())
            .collect();

        assert_eq!(delays, vec![2000, 4000, 8000, 16000, 30000]);
        assert!(backoff.is_exhausted());
        // sixth consecutive failure is terminal
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.retry_count(), 5);
    }

    #[test]
    fn test_backoff_reset_on_open() {
        let mut backoff = Backoff::new(BackoffConfig::default());
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.retry_count(), 2);

        backoff.reset();
        assert_eq!(backoff.retry_count(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(2000)));
    }

    #[test]
    fn test_backoff_custom_policy() {
        struct TestCase {
            config: BackoffConfig,
            expected: Vec<u128>,
        }

        let tests = vec![
            TestCase {
                // TC0: cap reached early
                config: BackoffConfig {
                    base_delay: Duration::from_millis(100),
                    max_delay: Duration::from_millis(500),
                    max_retries: 4,
                },
                expected: vec![200, 400, 500, 500],
            },
            TestCase {
                // TC1: no retries at all
                config: BackoffConfig {
                    max_retries: 0,
                    ..Default::default()
                },
                expected: vec![],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let mut backoff = Backoff::new(test.config);
            let actual: Vec<_> = std::iter::from_fn(|| backoff.next_delay())
                .map(|delay| delay.as_millis())
                .collect();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }
}
