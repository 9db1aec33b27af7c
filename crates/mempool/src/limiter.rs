//! Token-bucket rate limiter for transaction propagation.

use std::time::Duration;
use tokio::time::Instant;

/// Single token bucket: one token per `every`, up to `burst` banked.
///
/// The propagation loop awaits a token before each advertisement, spreading
/// bursts of admissions over the wire instead of flooding peers.
#[derive(Debug)]
pub struct RateLimiter {
    tokens: f64,
    capacity: f64,
    every: Duration,
    last_update: Instant,
}

impl RateLimiter {
    /// One token per `every`, bucket capacity `burst` (minimum 1).
    pub fn new(every: Duration, burst: u32) -> Self {
        let capacity = burst.max(1) as f64;
        Self {
            tokens: capacity,
            capacity,
            every,
            last_update: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let elapsed = self.last_update.elapsed();
        if self.every > Duration::ZERO {
            let earned = elapsed.as_secs_f64() / self.every.as_secs_f64();
            self.tokens = (self.tokens + earned).min(self.capacity);
        } else {
            self.tokens = self.capacity;
        }
        self.last_update = Instant::now();
    }

    /// Wait until a token is available and consume it.
    pub async fn acquire(&mut self) {
        loop {
            self.refill();
            if self.tokens >= 1.0 {
                self.tokens -= 1.0;
                return;
            }
            let missing = 1.0 - self.tokens;
            let wait = self.every.mul_f64(missing);
            tokio::time::sleep(wait).await;
        }
    }

    /// Consume a token only if one is available right now.
    pub fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_limited() {
        let mut limiter = RateLimiter::new(Duration::from_secs(1), 3);

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let mut limiter = RateLimiter::new(Duration::from_millis(100), 1);
        limiter.acquire().await;

        let start = tokio::time::Instant::now();
        limiter.acquire().await;
        // Paused-clock test: the sleep auto-advances virtual time.
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[test]
    fn test_zero_interval_never_limits() {
        let mut limiter = RateLimiter::new(Duration::ZERO, 1);
        for _ in 0..10 {
            assert!(limiter.try_acquire());
        }
    }
}
