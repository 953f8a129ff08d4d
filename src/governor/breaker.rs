//! Cooldown breaker tripped by provider throttling signals.
//!
//! Closed until tripped; reopens purely by clock expiry. There is no
//! half-open probe state: the next successful call resets it.

use tokio::time::{Duration, Instant};

/// Cooldown used when the requested one does not fit on the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    default_cooldown: Duration,
    retry_after: Instant,
}

impl CircuitBreaker {
    pub fn new(default_cooldown: Duration) -> Self {
        Self {
            default_cooldown,
            retry_after: Instant::now(),
        }
    }

    pub fn default_cooldown(&self) -> Duration {
        self.default_cooldown
    }

    /// Open the breaker for `wait`, or the default cooldown.
    ///
    /// Overwrites any running cooldown instead of stacking on top of it.
    pub fn trip(&mut self, wait: Option<Duration>) {
        self.trip_at(wait, Instant::now());
    }

    pub fn trip_at(&mut self, wait: Option<Duration>, now: Instant) {
        let wait = wait.unwrap_or(self.default_cooldown);
        self.retry_after = now
            .checked_add(wait)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
    }

    /// Close the breaker (on success).
    pub fn reset(&mut self) {
        self.retry_after = Instant::now();
    }

    pub fn is_open(&self) -> bool {
        self.is_open_at(Instant::now())
    }

    pub fn is_open_at(&self, now: Instant) -> bool {
        now < self.retry_after
    }

    pub fn time_remaining(&self) -> Duration {
        self.time_remaining_at(Instant::now())
    }

    pub fn time_remaining_at(&self, now: Instant) -> Duration {
        self.retry_after.saturating_duration_since(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_breaker_is_closed() {
        let breaker = CircuitBreaker::new(Duration::from_secs(60));
        assert!(!breaker.is_open());
        assert_eq!(breaker.time_remaining(), Duration::ZERO);
    }

    #[test]
    fn test_trip_with_huge_wait_does_not_overflow() {
        let mut breaker = CircuitBreaker::new(Duration::from_secs(60));
        let t0 = Instant::now();
        breaker.trip_at(Some(Duration::MAX), t0);

        assert!(breaker.is_open_at(t0));
        assert!(breaker.time_remaining_at(t0) >= Duration::from_secs(86_400 * 365));
    }

    #[test]
    fn test_trip_opens_until_expiry() {
        let mut breaker = CircuitBreaker::new(Duration::from_secs(60));
        let t0 = Instant::now();
        breaker.trip_at(Some(Duration::from_secs(5)), t0);

        assert!(breaker.is_open_at(t0));
        assert_eq!(breaker.time_remaining_at(t0), Duration::from_secs(5));
        assert!(breaker.is_open_at(t0 + Duration::from_millis(4999)));
        assert!(!breaker.is_open_at(t0 + Duration::from_secs(5)));
        assert_eq!(breaker.time_remaining_at(t0 + Duration::from_secs(7)), Duration::ZERO);
    }

    #[test]
    fn test_trip_without_wait_uses_default_cooldown() {
        let mut breaker = CircuitBreaker::new(Duration::from_secs(15));
        let t0 = Instant::now();
        breaker.trip_at(None, t0);
        assert_eq!(breaker.time_remaining_at(t0), Duration::from_secs(15));
    }

    #[test]
    fn test_trip_overwrites_instead_of_stacking() {
        let mut breaker = CircuitBreaker::new(Duration::from_secs(60));
        let t0 = Instant::now();
        breaker.trip_at(Some(Duration::from_secs(30)), t0);
        breaker.trip_at(Some(Duration::from_secs(2)), t0);
        assert_eq!(breaker.time_remaining_at(t0), Duration::from_secs(2));
    }

    #[test]
    fn test_reset_closes_immediately() {
        let mut breaker = CircuitBreaker::new(Duration::from_secs(60));
        breaker.trip(Some(Duration::from_secs(5)));
        assert!(breaker.is_open());

        breaker.reset();
        assert!(!breaker.is_open());
        assert_eq!(breaker.time_remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trip_expires_with_clock() {
        let mut breaker = CircuitBreaker::new(Duration::from_secs(60));
        breaker.trip(Some(Duration::from_secs(5)));
        assert!(breaker.is_open());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!breaker.is_open());
    }
}
