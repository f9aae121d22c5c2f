//! Per-thread throughput limit for the dump writer
//!
//! A token bucket holding bytes. Tokens are refilled at `maxRate` bytes per
//! second up to one second of burst. A write larger than the bucket is let
//! through and puts the bucket in debt, so the next write waits until the
//! average rate is back under the limit.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Rate limit settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Bytes per second, 0 = unlimited
    pub bytes_per_second: u64,
}

impl RateLimitConfig {
    pub fn new(bytes_per_second: u64) -> Self {
        Self { bytes_per_second }
    }

    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.bytes_per_second > 0
    }
}

struct Bucket {
    /// Negative while in debt
    tokens: i128,
    last_refill: Instant,
}

/// Token bucket limiting bytes per second
pub struct TokenBucketRateLimiter {
    config: RateLimitConfig,
    bucket: Mutex<Bucket>,
    /// Total time spent waiting (nanoseconds)
    total_wait_ns: AtomicU64,
    throttled: AtomicU64,
}

impl TokenBucketRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            bucket: Mutex::new(Bucket {
                tokens: config.bytes_per_second as i128,
                last_refill: Instant::now(),
            }),
            total_wait_ns: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill);
        let added = (elapsed.as_secs_f64() * self.config.bytes_per_second as f64) as i128;
        if added > 0 {
            bucket.tokens = (bucket.tokens + added).min(self.config.bytes_per_second as i128);
            bucket.last_refill = now;
        }
    }

    /// Account for `bytes`, waiting first while the bucket is in debt
    ///
    /// Returns the time waited.
    pub async fn acquire(&self, bytes: u64) -> Duration {
        if !self.config.is_enabled() {
            return Duration::ZERO;
        }
        let start = Instant::now();
        loop {
            let wait = {
                let mut bucket = self.bucket.lock();
                self.refill(&mut bucket);
                if bucket.tokens > 0 {
                    bucket.tokens -= bytes as i128;
                    None
                } else {
                    let needed = (1 - bucket.tokens) as f64;
                    Some(Duration::from_secs_f64(
                        (needed / self.config.bytes_per_second as f64).min(1.0),
                    ))
                }
            };
            match wait {
                None => break,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
        let waited = start.elapsed();
        if !waited.is_zero() {
            self.throttled.fetch_add(1, Ordering::Relaxed);
            self.total_wait_ns
                .fetch_add(waited.as_nanos() as u64, Ordering::Relaxed);
            debug!("Rate limiter: waited {:?} before writing {} bytes", waited, bytes);
        }
        waited
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            throttled: self.throttled.load(Ordering::Relaxed),
            total_wait_ms: self.total_wait_ns.load(Ordering::Relaxed) / 1_000_000,
            rate_limit: self.config.bytes_per_second,
            enabled: self.config.is_enabled(),
        }
    }
}

/// Rate limiter statistics
#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    /// Writes that had to wait
    pub throttled: u64,
    pub total_wait_ms: u64,
    pub rate_limit: u64,
    pub enabled: bool,
}

impl std::fmt::Display for RateLimiterStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.enabled {
            write!(
                f,
                "RateLimiter({}B/s, {} throttled, {}ms waited)",
                self.rate_limit, self.throttled, self.total_wait_ms
            )
        } else {
            write!(f, "RateLimiter(unlimited)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unlimited() {
        let limiter = TokenBucketRateLimiter::new(RateLimitConfig::unlimited());
        for _ in 0..100 {
            assert_eq!(limiter.acquire(1 << 30).await, Duration::ZERO);
        }
        assert!(!limiter.stats().enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debt_is_paid_back() {
        let limiter = TokenBucketRateLimiter::new(RateLimitConfig::new(1000));
        // burst of one second passes at once
        assert_eq!(limiter.acquire(1000).await, Duration::ZERO);
        // bucket is empty, so this write waits about a millisecond for a token
        limiter.acquire(3000).await;
        // 3000 bytes of debt take three seconds to pay back
        let waited = limiter.acquire(1).await;
        assert!(waited >= Duration::from_millis(2900), "waited {:?}", waited);
        assert_eq!(limiter.stats().throttled, 2);
    }
}
