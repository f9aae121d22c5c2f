//! Retry policy for remote storage operations
//!
//! Transient failures are retried three times with a linearly growing delay,
//! then with an exponential delay that starts at 3 seconds and is capped at
//! 80 seconds.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::Result;

/// Retry schedule for transient storage errors
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Number of linearly spaced retries before switching to exponential back-off
    pub linear_retries: u32,
    /// Step of the linear phase
    pub linear_step: Duration,
    /// First exponential delay
    pub initial_backoff: Duration,
    /// Largest exponential delay
    pub max_backoff: Duration,
    /// Total retries before giving up
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            linear_retries: 3,
            linear_step: Duration::from_secs(1),
            initial_backoff: Duration::from_secs(3),
            max_backoff: Duration::from_secs(80),
            max_retries: 10,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= self.linear_retries {
            return self.linear_step * attempt;
        }
        let exp = attempt - self.linear_retries - 1;
        let factor = 2u32.saturating_pow(exp.min(16));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `op`, retrying while it fails with a retriable error
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retriable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying storage operation: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Equivalent `object_store` client retry configuration
    #[cfg(any(feature = "s3", feature = "azure", feature = "par"))]
    pub fn to_object_store(&self) -> object_store::RetryConfig {
        object_store::RetryConfig {
            backoff: object_store::BackoffConfig {
                init_backoff: self.initial_backoff,
                max_backoff: self.max_backoff,
                base: 2.0,
            },
            max_retries: self.max_retries as usize,
            retry_timeout: Duration::from_secs(15 * 60),
        }
    }
}
