use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Global request budget shared by every caller of the gateway. Callers that find
/// the bucket empty queue on a timer instead of failing.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
}

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let to_add = elapsed.as_secs_f64() * self.refill_per_sec;
        if to_add > 0.0 {
            self.tokens = (self.tokens + to_add).min(self.capacity);
            self.last_refill = now;
        }
    }

    fn wait_for_one(&self) -> Duration {
        let missing = (1.0 - self.tokens).max(0.0);
        Duration::from_secs_f64(missing / self.refill_per_sec)
    }
}

impl RateLimiter {
    pub fn per_minute(requests_per_minute: u32) -> Self {
        let capacity = f64::from(requests_per_minute.max(1));
        Self {
            bucket: Mutex::new(TokenBucket {
                capacity,
                tokens: capacity,
                refill_per_sec: capacity / 60.0,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.lock();
        bucket.refill(Instant::now());
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.lock();
                bucket.refill(Instant::now());
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                bucket.wait_for_one()
            };
            tracing::debug!(target: "desk", wait_ms = wait.as_millis() as u64, "rate limit exhausted, queueing");
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    pub fn available(&self) -> f64 {
        let mut bucket = self.lock();
        bucket.refill(Instant::now());
        bucket.tokens
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TokenBucket> {
        match self.bucket.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
