use crate::error::AppError;
use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Clone)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

impl Bucket {
    fn full(capacity: u32, now: Instant) -> Self {
        Self {
            tokens: capacity as f64,
            last_update: now,
        }
    }

    fn allow_request(&mut self, capacity: u32, refill_rate: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = f64::min(capacity as f64, self.tokens + elapsed * refill_rate);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Bucket key for credential guesses against one order. Snapshot reads and
/// push subscriptions share it, so neither path widens the other's budget.
pub fn credential_key(tracking_number: &str) -> String {
    format!("tracking:{}", tracking_number.trim().to_ascii_uppercase())
}

/// Token buckets keyed by caller-chosen strings, e.g. [`credential_key`].
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    capacity: u32,
    refill_rate: f64,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity,
            refill_rate,
        }
    }

    pub fn check_rate_limit(&self, key: &str) -> Result<(), AppError> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), AppError> {
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::full(self.capacity, now));

        if bucket.allow_request(self.capacity, self.refill_rate, now) {
            Ok(())
        } else {
            Err(AppError::RateLimitExceeded(format!("Rate limit for {}", key)))
        }
    }

    /// Drop buckets that have been idle long enough to be full again.
    pub fn prune(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_update) < idle);
        before - self.buckets.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
