//! Exponential reconnect backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Doubling delay between `min` and `max`.
///
/// Each delay is drawn uniformly from the upper half of the current step
/// ("equal jitter"), so it never drops below half the nominal value.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            attempt: 0,
        }
    }

    /// Nominal delay for the current attempt, before jitter.
    pub fn current(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt.min(31)).unwrap_or(u32::MAX);
        self.min.saturating_mul(factor).min(self.max)
    }

    /// Delay before the next attempt. Advances the step.
    pub fn next_delay(&mut self) -> Duration {
        let nominal = self.current();
        self.attempt = self.attempt.saturating_add(1);
        let half = nominal / 2;
        let spread = (nominal - half).as_millis() as u64;
        let jitter = if spread == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=spread)
        };
        half + Duration::from_millis(jitter)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(4));
        let expected = [500, 1000, 2000, 4000, 4000, 4000];
        for nominal in expected {
            assert_eq!(backoff.current(), Duration::from_millis(nominal));
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(nominal / 2), "{delay:?}");
            assert!(delay <= Duration::from_millis(nominal), "{delay:?}");
        }
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(10));
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempts(), 2);
        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_millis(100));
    }

    #[test]
    fn test_large_attempt_counts_do_not_overflow() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(30));
        for _ in 0..100 {
            assert!(backoff.next_delay() <= Duration::from_secs(30));
        }
    }
}
