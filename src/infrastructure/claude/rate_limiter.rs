use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::debug;

use crate::domain::models::RateLimitConfig;

/// Token bucket that paces outgoing backend requests.
///
/// Holds up to `capacity` tokens and refills continuously at `refill_rate`
/// tokens per second. This only smooths our own request rate; a 429 from the
/// backend is still handled by the caller.
pub struct TokenBucketRateLimiter {
    bucket: Mutex<Bucket>,
    capacity: f64,
    refill_rate: f64,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucketRateLimiter {
    /// Create a limiter that starts full.
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        let capacity = capacity.max(1.0);
        let refill_rate = refill_rate.max(f64::MIN_POSITIVE);
        Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_rate,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            f64::from(config.burst_size),
            f64::from(config.requests_per_minute) / 60.0,
        )
    }

    /// Take one token, waiting until one is available.
    pub async fn acquire(&self) {
        loop {
            let mut bucket = self.bucket.lock().await;

            let now = Instant::now();
            let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
            let available = (bucket.tokens + elapsed * self.refill_rate).min(self.capacity);
            bucket.last_refill = now;

            if available >= 1.0 {
                bucket.tokens = available - 1.0;
                return;
            }
            bucket.tokens = available;

            let wait = Duration::from_secs_f64(((1.0 - available) / self.refill_rate).max(0.01));
            drop(bucket);

            debug!(wait_ms = wait.as_millis(), "pacing backend request");
            sleep(wait).await;
        }
    }

    #[cfg(test)]
    async fn available_tokens(&self) -> f64 {
        let bucket = self.bucket.lock().await;
        let elapsed = bucket.last_refill.elapsed().as_secs_f64();
        (bucket.tokens + elapsed * self.refill_rate).min(self.capacity)
    }
}
