//! Token bucket math.
//!
//! Pure bookkeeping: no locking, no async, no retries. The scheduler owns the
//! bucket and only touches it while holding its lock.

use tokio::time::{Duration, Instant};

/// Fixed-rate permit stream with a burst capacity.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    /// Tokens per second.
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self::new_at(capacity, refill_rate, Instant::now())
    }

    pub fn new_at(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        let capacity = f64::from(capacity);
        Self {
            capacity,
            tokens: capacity,
            refill_rate,
            last_refill: now,
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Take `cost` tokens if they are available.
    pub fn try_consume(&mut self, cost: f64) -> bool {
        self.try_consume_at(cost, Instant::now())
    }

    pub fn try_consume_at(&mut self, cost: f64, now: Instant) -> bool {
        debug_assert!(cost > 0.0, "token cost must be positive");
        self.refill(now);
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Time until `cost` tokens are available, assuming nobody else consumes.
    pub fn wait_time(&mut self, cost: f64) -> Duration {
        self.wait_time_at(cost, Instant::now())
    }

    pub fn wait_time_at(&mut self, cost: f64, now: Instant) -> Duration {
        self.refill(now);
        let needed = cost - self.tokens;
        if needed <= 0.0 || self.refill_rate <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(needed / self.refill_rate).unwrap_or(Duration::MAX)
    }

    /// Return tokens taken for a grant nobody received.
    pub fn refund(&mut self, cost: f64) {
        self.tokens = (self.tokens + cost).min(self.capacity);
    }

    /// Tokens currently available.
    pub fn available(&mut self) -> f64 {
        self.available_at(Instant::now())
    }

    pub fn available_at(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    fn refill(&mut self, now: Instant) {
        // saturating: a reading older than last_refill adds nothing
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed > Duration::ZERO {
            let added = elapsed.as_secs_f64() * self.refill_rate;
            self.tokens = (self.tokens + added).min(self.capacity);
            self.last_refill = now;
        }
    }
}
