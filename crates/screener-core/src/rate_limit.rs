//! Token bucket rate limiter shared by every worker calling the same gateway.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    /// Tokens added per second
    rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Async token bucket. Cloning shares the same bucket.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    bucket: Option<Arc<Mutex<TokenBucket>>>,
}

impl RateLimiter {
    /// `requests_per_second` sustained, with room to burst up to `burst` calls.
    /// A non-positive or non-finite rate disables limiting.
    pub fn new(requests_per_second: f64, burst: f64) -> Self {
        if !requests_per_second.is_finite() || requests_per_second <= 0.0 {
            return Self::unlimited();
        }
        let capacity = burst.max(1.0);
        Self {
            bucket: Some(Arc::new(Mutex::new(TokenBucket {
                tokens: capacity,
                capacity,
                rate: requests_per_second,
                last_refill: Instant::now(),
            }))),
        }
    }

    /// Evenly spaced calls, no bursting.
    pub fn per_second(requests_per_second: f64) -> Self {
        Self::new(requests_per_second, 1.0)
    }

    pub fn unlimited() -> Self {
        Self { bucket: None }
    }

    pub fn is_limited(&self) -> bool {
        self.bucket.is_some()
    }

    /// Wait until a token is available and take it.
    pub async fn acquire(&self) {
        let Some(bucket) = &self.bucket else {
            return;
        };

        loop {
            let mut b = bucket.lock().await;
            b.refill();

            if b.tokens >= 1.0 {
                b.tokens -= 1.0;
                return;
            }

            let wait = Duration::from_secs_f64((1.0 - b.tokens) / b.rate);
            drop(b);
            tracing::trace!("Rate limiter: waiting {:.3}s for a slot", wait.as_secs_f64());
            tokio::time::sleep(wait).await;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}
