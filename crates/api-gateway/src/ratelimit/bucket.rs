//! Token bucket arithmetic and the storage-agnostic admission algorithm.

use crate::metrics::GatewayMetrics;
use crate::ports::Clock;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Capacity and refill rate of a bucket. Both equal the configured limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSpec {
    pub capacity: u64,
    /// Tokens per second
    pub refill_rate: u64,
}

impl BucketSpec {
    /// `limit` requests per second with a burst of `limit`
    pub fn per_second(limit: u32) -> Self {
        Self {
            capacity: u64::from(limit),
            refill_rate: u64::from(limit),
        }
    }
}

/// Outcome of one `take`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Tokens left after the decision
    pub remaining: u64,
}

/// Refillable token count for one limiter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBucket {
    pub capacity: u64,
    pub tokens: u64,
    pub refill_rate: u64,
    /// Time of the last refill that added at least one token
    pub last_refill: Duration,
}

impl TokenBucket {
    /// A new bucket starts full
    pub fn full(spec: BucketSpec, now: Duration) -> Self {
        Self {
            capacity: spec.capacity,
            tokens: spec.capacity,
            refill_rate: spec.refill_rate,
            last_refill: now,
        }
    }

    /// Apply a changed limit to an existing bucket
    pub fn reconfigure(&mut self, spec: BucketSpec) {
        self.capacity = spec.capacity;
        self.refill_rate = spec.refill_rate;
        self.tokens = self.tokens.min(self.capacity);
    }

    /// Lazy refill: add `floor(elapsed * rate)` tokens, capped at capacity.
    ///
    /// `last_refill` only moves when at least one token was added, so
    /// fractional progress is kept for the next call.
    pub fn refill(&mut self, now: Duration) {
        let elapsed = now.saturating_sub(self.last_refill);
        let amount = elapsed.as_nanos().saturating_mul(u128::from(self.refill_rate)) / NANOS_PER_SEC;
        if amount > 0 {
            let amount = u64::try_from(amount).unwrap_or(u64::MAX);
            self.tokens = self.tokens.saturating_add(amount).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// Refill, then consume one token if any is left
    pub fn try_take(&mut self, now: Duration) -> Decision {
        self.refill(now);
        if self.tokens > 0 {
            self.tokens -= 1;
            Decision {
                allowed: true,
                remaining: self.tokens,
            }
        } else {
            Decision {
                allowed: false,
                remaining: 0,
            }
        }
    }
}

/// Bucket store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Store could not be reached or rejected the command
    #[error("bucket store unavailable: {0}")]
    Unavailable(String),
    /// Stored state could not be decoded
    #[error("malformed bucket state for {key}: {reason}")]
    Malformed { key: String, reason: String },
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Holds token buckets keyed by limiter key.
///
/// `take` must run refill-and-consume as one atomic step per key.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Refill and try to consume one token from the bucket at `key`,
    /// creating it full when absent.
    async fn take(&self, key: &str, spec: BucketSpec, now: Duration)
        -> Result<Decision, StoreError>;

    /// Current stored state, without refilling
    async fn peek(&self, key: &str) -> Result<Option<TokenBucket>, StoreError>;
}

/// Token bucket admission over an injected store and clock.
pub struct TokenBucketAlgorithm {
    store: Arc<dyn BucketStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<GatewayMetrics>,
}

impl TokenBucketAlgorithm {
    pub fn new(
        store: Arc<dyn BucketStore>,
        clock: Arc<dyn Clock>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            store,
            clock,
            metrics,
        }
    }

    /// Whether one request may proceed for `key` under `limit` per second.
    ///
    /// A failing store admits the request.
    pub async fn allow(&self, key: &str, limit: u32) -> bool {
        let now = self.clock.now();
        match self.store.take(key, BucketSpec::per_second(limit), now).await {
            Ok(decision) => decision.allowed,
            Err(e) => {
                warn!(key = %key, error = %e, "Rate limit store failed, admitting request");
                self.metrics.record_store_failure();
                true
            }
        }
    }

    pub fn store(&self) -> &Arc<dyn BucketStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
