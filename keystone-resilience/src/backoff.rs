//! Backoff delay calculation for retry policies

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with additive jitter.
///
/// The delay before retry number `attempt` (counted from 0) is
/// `2^attempt * base_delay + uniform(0, base_delay)`. There is no upper cap;
/// the exponential term saturates at `Duration::MAX` instead of overflowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base_delay: Duration,
}

impl ExponentialBackoff {
    /// Create a new calculator for the given base delay
    pub fn new(base_delay: Duration) -> Self {
        Self { base_delay }
    }

    /// Base delay the calculator scales from
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Deterministic part of the delay for a retry attempt
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(multiplier)
    }

    /// Full delay for a retry attempt, jitter included
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay_for(attempt)
            .saturating_add(jitter(self.base_delay))
    }
}

/// Uniformly distributed jitter in `[0, upper)`
pub fn jitter(upper: Duration) -> Duration {
    let nanos = upper.as_nanos().min(u64::MAX as u128) as u64;
    if nanos == 0 {
        return Duration::ZERO;
    }

    Duration::from_nanos(rand::rng().random_range(0..nanos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_base_delay() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(200));

        assert_eq!(backoff.base_delay_for(0), Duration::from_millis(200));
        assert_eq!(backoff.base_delay_for(1), Duration::from_millis(400));
        assert_eq!(backoff.base_delay_for(2), Duration::from_millis(800));
        assert_eq!(backoff.base_delay_for(3), Duration::from_millis(1600));
    }

    #[test]
    fn test_jitter_bounds() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(100));

        for attempt in 0..5 {
            let floor = backoff.base_delay_for(attempt);
            for _ in 0..50 {
                let delay = backoff.delay_for(attempt);
                assert!(delay >= floor);
                assert!(delay < floor + Duration::from_millis(100));
            }
        }
    }

    #[test]
    fn test_zero_base_delay() {
        let backoff = ExponentialBackoff::new(Duration::ZERO);
        assert_eq!(backoff.delay_for(4), Duration::ZERO);
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_large_attempt_saturates() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(1));

        // No cap is applied, but the computation must not panic
        let delay = backoff.delay_for(200);
        assert!(delay >= backoff.base_delay_for(31));
    }
}
