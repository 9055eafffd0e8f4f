use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

use crate::clock::{Clock, SystemClock};

#[derive(Debug, Error, PartialEq)]
pub enum RateLimitError {
    #[error("max must be > 0")]
    ZeroMax,

    #[error("interval_ms must be > 0")]
    ZeroInterval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    pub retry_after_ms: u64,
    /// Tokens left in the bucket after this attempt.
    pub remaining: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bucket {
    tokens: u64,
    capacity: u64,
    interval_ms: u64,
    last_refill_ms: i64,
}

/// Token buckets keyed by caller-supplied strings.
///
/// Refill is interval-quantized: each whole elapsed interval grants `max`
/// tokens and any partial interval grants nothing. The refill timestamp
/// moves to `now` on every attempt with positive elapsed time, including
/// denied ones.
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    clock: Arc<dyn Clock>,
    max_keys: Option<usize>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: DashMap::new(),
            clock,
            max_keys: None,
        }
    }

    /// Caps the number of tracked keys. A new key arriving at the cap first
    /// sweeps idle buckets, then evicts the least recently refilled ones.
    ///
    /// The cap is soft: eviction scans the whole map (O(n) per new key at
    /// the cap), and concurrent first attempts for distinct keys can each
    /// insert after making room, overshooting by up to the number of racing
    /// callers.
    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = Some(max_keys.max(1));
        self
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn attempt(
        &self,
        key: &str,
        interval_ms: u64,
        max: u64,
    ) -> Result<RateDecision, RateLimitError> {
        self.attempt_at(key, interval_ms, max, self.clock.now_ms())
    }

    pub fn attempt_at(
        &self,
        key: &str,
        interval_ms: u64,
        max: u64,
        now_ms: i64,
    ) -> Result<RateDecision, RateLimitError> {
        if max == 0 {
            return Err(RateLimitError::ZeroMax);
        }
        if interval_ms == 0 {
            return Err(RateLimitError::ZeroInterval);
        }

        if !self.buckets.contains_key(key) {
            self.make_room(now_ms);
        }

        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut bucket = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: max,
            capacity: max,
            interval_ms,
            last_refill_ms: now_ms,
        });

        let elapsed = now_ms.saturating_sub(bucket.last_refill_ms);
        if elapsed > 0 {
            let intervals = elapsed as u64 / interval_ms;
            let refill = intervals.saturating_mul(max);
            bucket.tokens = bucket.tokens.saturating_add(refill).min(bucket.capacity);
            bucket.last_refill_ms = now_ms;
        }

        if bucket.tokens == 0 {
            return Ok(RateDecision {
                allowed: false,
                retry_after_ms: interval_ms,
                remaining: 0,
            });
        }

        bucket.tokens -= 1;
        Ok(RateDecision {
            allowed: true,
            retry_after_ms: 0,
            remaining: bucket.tokens,
        })
    }

    /// Drops buckets that have been idle for at least one full interval.
    /// Such a bucket would be refilled to capacity on its next attempt, so
    /// forgetting it does not change any outcome.
    pub fn sweep_idle(&self, now_ms: i64) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            let idle = now_ms.saturating_sub(bucket.last_refill_ms);
            idle < 0 || (idle as u64) < bucket.interval_ms
        });
        before.saturating_sub(self.buckets.len())
    }

    pub fn sweep_idle_now(&self) -> usize {
        self.sweep_idle(self.clock.now_ms())
    }

    fn make_room(&self, now_ms: i64) {
        let Some(max_keys) = self.max_keys else {
            return;
        };
        if self.buckets.len() < max_keys {
            return;
        }

        self.sweep_idle(now_ms);

        while self.buckets.len() >= max_keys {
            let oldest = self
                .buckets
                .iter()
                .min_by_key(|entry| entry.value().last_refill_ms)
                .map(|entry| entry.key().clone());

            match oldest {
                Some(key) => {
                    self.buckets.remove(&key);
                }
                None => break,
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}
