//! Token bucket rate limiter guarding the upstream request quota.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;

/// No slot became available within the allowed wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("request quota exceeded, next slot in {}ms", .retry_after.as_millis())]
pub struct QuotaExceeded {
    /// Estimated time until the next slot opens.
    pub retry_after: Duration,
}

/// Proof that a request slot was taken.
#[derive(Debug)]
pub struct Permit {
    _private: (),
}

/// Current limiter state.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub max_requests: u32,
    pub window_secs: f64,
    pub tokens_available: f64,
    pub next_available_in_ms: Option<u64>,
}

/// Token bucket sized to the quota window.
///
/// Holds at most `max_requests` tokens and refills them evenly over
/// `window`, so sustained throughput never exceeds the quota while short
/// bursts up to the full window size are allowed.
pub struct TokenBucket {
    /// Max tokens (= requests per window).
    capacity: f64,
    /// Current available tokens.
    tokens: f64,
    /// Tokens added per second.
    refill_rate: f64,
    /// Last refill time.
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a new token bucket. The bucket starts full.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        let capacity = max_requests as f64;
        let window_secs = window.as_secs_f64().max(f64::EPSILON);
        Self {
            capacity,
            tokens: capacity,
            refill_rate: capacity / window_secs,
            last_refill: Instant::now(),
        }
    }

    /// Try to take a token.
    ///
    /// Returns `Err(wait_duration)` if none is available.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(self.time_until_token())
        }
    }

    pub fn status(&mut self) -> RateLimitStatus {
        self.refill();
        RateLimitStatus {
            max_requests: self.capacity as u32,
            window_secs: if self.refill_rate > 0.0 {
                self.capacity / self.refill_rate
            } else {
                0.0
            },
            tokens_available: self.tokens,
            next_available_in_ms: if self.tokens >= 1.0 {
                None
            } else {
                Some(self.time_until_token().as_millis() as u64)
            },
        }
    }

    fn time_until_token(&self) -> Duration {
        if self.refill_rate <= 0.0 {
            return Duration::MAX;
        }
        let tokens_needed = 1.0 - self.tokens;
        Duration::from_secs_f64(tokens_needed / self.refill_rate)
    }

    /// Refill tokens based on elapsed time.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Bounds outgoing request rate against a fixed quota window.
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
    max_wait: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration, max_wait: Duration) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(max_requests, window)),
            max_wait,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, config.window(), config.max_wait())
    }

    /// Take a slot without waiting.
    pub async fn try_acquire(&self) -> Result<Permit, QuotaExceeded> {
        self.bucket
            .lock()
            .await
            .try_acquire()
            .map(|()| Permit { _private: () })
            .map_err(|retry_after| QuotaExceeded { retry_after })
    }

    /// Wait for a slot, up to the configured maximum wait.
    ///
    /// Fails immediately when the next slot is further away than the
    /// remaining wait budget, carrying the estimated time until it opens.
    pub async fn acquire(&self) -> Result<Permit, QuotaExceeded> {
        let deadline = Instant::now() + self.max_wait;
        loop {
            let wait = match self.bucket.lock().await.try_acquire() {
                Ok(()) => return Ok(Permit { _private: () }),
                Err(wait) => wait,
            };

            let now = Instant::now();
            if wait > deadline.saturating_duration_since(now) {
                warn!(
                    "Rate limit budget exhausted, next slot in {}ms",
                    wait.as_millis()
                );
                return Err(QuotaExceeded { retry_after: wait });
            }

            debug!("Rate limited, waiting {}ms for a slot", wait.as_millis());
            tokio::time::sleep(wait).await;
        }
    }

    pub async fn status(&self) -> RateLimitStatus {
        self.bucket.lock().await.status()
    }
}
