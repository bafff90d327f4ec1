use std::time::Duration;

pub const MAX_ATTEMPTS_LIMIT: u32 = 10;

/// Bounded exponential retry: attempt `n` (1-based) that failed transiently waits
/// `base_delay * 2^(n-1)` before attempt `n + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, MAX_ATTEMPTS_LIMIT),
            base_delay,
        }
    }

    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let shift = failed_attempt.saturating_sub(1).min(MAX_ATTEMPTS_LIMIT);
        self.base_delay.saturating_mul(1u32 << shift)
    }

    pub fn has_attempts_left(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// The full wait schedule between attempts, for logging and tests.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts).map(|n| self.delay_after(n)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_strictly_increasing() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        let schedule = policy.schedule();
        assert_eq!(
            schedule,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
            ]
        );
        assert!(schedule.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_attempts_clamped() {
        assert_eq!(RetryPolicy::new(0, Duration::from_millis(1)).max_attempts, 1);
        assert_eq!(
            RetryPolicy::new(99, Duration::from_millis(1)).max_attempts,
            MAX_ATTEMPTS_LIMIT
        );
    }
}
