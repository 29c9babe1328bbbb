//! Per-session branch-creation rate limiter (spec §4.8.2's 10/s limit, §5's
//! "per-client ... token buckets with periodic cleanup").
//!
//! Grounded on `memory-mcp/src/server/rate_limiter.rs`'s `TokenBucket`,
//! narrowed from that module's per-client read/write split to the single
//! operation this runtime rate-limits (branch creation), with the same
//! lazy-refill-on-check approach in place of a dedicated cleanup task.

use std::time::{Duration, Instant};

/// Token bucket for one session's branch-creation rate limit.
#[derive(Debug)]
pub struct TokenBucket {
    tokens: f64,
    capacity: u32,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    #[must_use]
    pub fn new(requests_per_second: u32, burst_size: u32) -> Self {
        Self {
            tokens: f64::from(burst_size),
            capacity: burst_size,
            refill_rate: f64::from(requests_per_second),
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(f64::from(self.capacity));
        self.last_refill = now;
    }

    /// Try to consume one token; `false` means the caller is rate-limited.
    pub fn try_consume(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// How long until the next token becomes available.
    #[must_use]
    pub fn time_until_next_token(&self) -> Duration {
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_burst_then_rejects() {
        let mut bucket = TokenBucket::new(10, 3);
        assert!(bucket.try_consume());
        assert!(bucket.try_consume());
        assert!(bucket.try_consume());
        assert!(!bucket.try_consume());
    }

    #[test]
    fn refills_over_time() {
        let mut bucket = TokenBucket::new(1000, 1);
        assert!(bucket.try_consume());
        assert!(!bucket.try_consume());
        std::thread::sleep(Duration::from_millis(5));
        assert!(bucket.try_consume());
    }
}
