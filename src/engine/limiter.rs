//! Per-source token bucket.
//!
//! Tokens refill continuously at `rate` per second up to `capacity`. Unlike a
//! rejecting limiter, [`TokenBucket::acquire`] waits until a token is free, so
//! callers are slowed down rather than failed.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Longest single sleep before the bucket is re-checked.
const MAX_WAIT: Duration = Duration::from_secs(3600);

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    name: &'static str,
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// `rate` requests per second, bursting up to one second's worth.
    pub fn new(name: &'static str, rate: f64) -> Self {
        let capacity = rate.max(1.0);
        Self {
            name,
            rate,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Waits for and consumes one token.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::try_from_secs_f64((1.0 - state.tokens) / self.rate)
                    .unwrap_or(MAX_WAIT)
                    .min(MAX_WAIT)
            };

            tracing::trace!(source = self.name, wait_ms = wait.as_millis() as u64, "Rate limited");
            tokio::time::sleep(wait).await;
        }
    }
}
