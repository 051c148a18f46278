//! Per-host token bucket throttling for tracker downloads.

use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Token bucket for a single host.
///
/// Tokens are added at a constant rate and consumed per request. The bucket
/// starts full, so a burst up to the capacity goes through immediately.
pub struct TokenBucket {
    /// Max tokens (= requests per minute).
    capacity: f32,
    tokens: f32,
    /// Tokens added per second.
    refill_rate: f32,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute as f32;
        Self {
            capacity,
            tokens: capacity,
            refill_rate: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    /// Take a token, or report how long until one is available.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let tokens_needed = 1.0 - self.tokens;
            Err(Duration::from_secs_f32(tokens_needed / self.refill_rate))
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f32();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Lazily created token buckets, one per host.
pub struct HostThrottle {
    requests_per_minute: u32,
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl HostThrottle {
    /// `requests_per_minute == 0` disables throttling.
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until a request to `host` is allowed.
    pub async fn acquire(&self, host: &str) {
        if self.requests_per_minute == 0 {
            return;
        }
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets
                    .entry(host.to_string())
                    .or_insert_with(|| TokenBucket::new(self.requests_per_minute));
                match bucket.try_acquire() {
                    Ok(()) => return,
                    Err(wait) => wait,
                }
            };
            debug!(host, wait_ms = wait.as_millis() as u64, "Throttling fetch");
            tokio::time::sleep(wait).await;
        }
    }
}
