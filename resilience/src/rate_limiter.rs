// Token-bucket rate limiter for external calls.
// Denial is a normal outcome; callers skip the cycle rather than queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Token-bucket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Maximum burst size in tokens
    #[serde(default = "default_capacity")]
    pub capacity: f64,

    /// Tokens restored per second
    #[serde(default = "default_refill_per_sec")]
    pub refill_per_sec: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_per_sec: default_refill_per_sec(),
        }
    }
}

fn default_capacity() -> f64 {
    10.0
}

fn default_refill_per_sec() -> f64 {
    2.0
}

struct Bucket {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

/// Non-blocking token bucket shared across worker tasks
pub struct RateLimiter {
    config: RateLimiterConfig,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let bucket = Bucket {
            tokens: config.capacity,
            last_refill: Utc::now(),
        };
        Self {
            config,
            bucket: Mutex::new(bucket),
        }
    }

    /// Take one token if available. Never blocks.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Utc::now())
    }

    fn try_acquire_at(&self, now: DateTime<Utc>) -> bool {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());

        let elapsed = (now - bucket.last_refill).num_milliseconds().max(0) as f64 / 1000.0;
        bucket.tokens =
            (bucket.tokens + elapsed * self.config.refill_per_sec).min(self.config.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn limiter(capacity: f64, refill_per_sec: f64) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            capacity,
            refill_per_sec,
        })
    }

    #[test]
    fn test_burst_then_deny() {
        let limiter = limiter(2.0, 1.0);
        let now = Utc::now();
        assert!(limiter.try_acquire_at(now));
        assert!(limiter.try_acquire_at(now));
        assert!(!limiter.try_acquire_at(now));
    }

    #[test]
    fn test_refill_over_time() {
        let limiter = limiter(1.0, 1.0);
        let now = Utc::now();
        assert!(limiter.try_acquire_at(now));
        assert!(!limiter.try_acquire_at(now));

        // One second restores one token
        assert!(limiter.try_acquire_at(now + Duration::milliseconds(1100)));
    }

    #[test]
    fn test_refill_capped_at_capacity() {
        let limiter = limiter(2.0, 10.0);
        let now = Utc::now();

        // A long idle period must not accumulate more than capacity
        let later = now + Duration::seconds(60);
        assert!(limiter.try_acquire_at(later));
        assert!(limiter.try_acquire_at(later));
        assert!(!limiter.try_acquire_at(later));
    }
}
