//! Token-bucket rate limiter, one instance per exchange (spec.md §4.1,
//! §5: "exchange API usage is gated per exchange by token-bucket").
//!
//! Adapted from the teacher's `risk::rate_limiter` token-bucket
//! implementation. The teacher's version is a pure `allow()`/`allow_n()`
//! check meant to be polled from a hot loop; this system instead awaits a
//! slot cooperatively (spec.md §4.1: "`acquire()` blocks cooperatively
//! until a slot opens"), so the fixed-point atomic bucket is replaced by a
//! `tokio::sync::Mutex`-guarded f64 bucket refilled lazily on each call —
//! simplicity over lock-freedom is the right trade here since this is not
//! the sub-microsecond hot path the teacher's version protected.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Sustained requests/sec.
    pub rate_per_sec: f64,
    /// Burst bucket capacity, in tokens.
    pub burst_capacity: f64,
}

impl RateLimiterConfig {
    /// Default shape from spec.md §5: "10 req/s per exchange with a
    /// 10-second burst window of 50".
    pub fn default_for_exchange() -> Self {
        Self {
            rate_per_sec: 10.0,
            burst_capacity: 50.0,
        }
    }

    pub fn new(rate_per_sec: f64, burst_capacity: f64) -> Self {
        Self {
            rate_per_sec,
            burst_capacity,
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Cooperative token-bucket limiter. Cloning shares the same bucket.
pub struct RateLimiter {
    config: RateLimiterConfig,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                tokens: config.burst_capacity,
                last_refill: Instant::now(),
            }),
            config,
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let elapsed = bucket.last_refill.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }
        bucket.tokens = (bucket.tokens + elapsed * self.config.rate_per_sec)
            .min(self.config.burst_capacity);
        bucket.last_refill = Instant::now();
    }

    /// Non-blocking check: consumes a token if one is available.
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Blocks cooperatively until a token is available (spec.md §4.1).
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                self.refill(&mut bucket);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - bucket.tokens;
                    Some(Duration::from_secs_f64(deficit / self.config.rate_per_sec))
                }
            };
            match wait {
                None => return,
                Some(delay) => {
                    debug!(?delay, "rate limiter: waiting for a token");
                    sleep(delay.max(Duration::from_millis(1))).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_capacity_is_immediately_available() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(10.0, 5.0));
        for _ in 0..5 {
            assert!(limiter.try_acquire().await);
        }
        assert!(!limiter.try_acquire().await);
    }

    #[tokio::test]
    async fn acquire_eventually_succeeds_after_exhausting_burst() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(1000.0, 1.0));
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);
        // With a 1000/s refill rate this should resolve near-instantly.
        tokio::time::timeout(Duration::from_secs(1), limiter.acquire())
            .await
            .expect("acquire should not hang");
    }
}
