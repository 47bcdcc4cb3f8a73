/// Linear backoff calculator for fetch retries.
///
/// Tracks the attempt count. The n-th delay is `unit * n`, capped at
/// `max_delay`. Calling `reset()` starts the sequence over.
use std::time::Duration;

pub struct LinearBackoff {
    unit: Duration,
    max_delay: Duration,
    /// Number of delays handed out since the last reset.
    pub attempt: u32,
}

impl LinearBackoff {
    pub fn new(unit: Duration, max_delay: Duration) -> Self {
        Self {
            unit,
            max_delay,
            attempt: 0,
        }
    }

    /// Returns the next delay and advances the attempt count.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;
        (self.unit * self.attempt).min(self.max_delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Returns true if the attempt count has reached `max`.
    pub fn exceeded_max_attempts(&self, max: u32) -> bool {
        self.attempt >= max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_growth() {
        let mut b = LinearBackoff::new(Duration::from_millis(100), Duration::from_secs(10));
        assert_eq!(b.next_delay(), Duration::from_millis(100));
        assert_eq!(b.next_delay(), Duration::from_millis(200));
        assert_eq!(b.next_delay(), Duration::from_millis(300));
        assert_eq!(b.attempt, 3);
    }

    #[test]
    fn test_max_delay_cap() {
        let mut b = LinearBackoff::new(Duration::from_secs(2), Duration::from_secs(5));
        assert_eq!(b.next_delay(), Duration::from_secs(2));
        assert_eq!(b.next_delay(), Duration::from_secs(4));
        assert_eq!(b.next_delay(), Duration::from_secs(5));
        assert_eq!(b.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_reset() {
        let mut b = LinearBackoff::new(Duration::from_secs(1), Duration::from_secs(60));
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.attempt, 0);
        assert_eq!(b.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_exceeded_max_attempts() {
        let mut b = LinearBackoff::new(Duration::from_secs(1), Duration::from_secs(60));
        assert!(!b.exceeded_max_attempts(2));
        b.next_delay();
        assert!(!b.exceeded_max_attempts(2));
        b.next_delay();
        assert!(b.exceeded_max_attempts(2));
    }
}
