//! In-process bucket store for single-instance deployments.

use super::bucket::{BucketSpec, BucketStore, Decision, StoreError, TokenBucket};
use crate::ports::Clock;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Buckets in a `DashMap`; the entry guard is the per-key lock.
#[derive(Default)]
pub struct MemoryBucketStore {
    buckets: DashMap<String, TokenBucket>,
}

impl MemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop buckets whose last refill is older than `max_idle`.
    ///
    /// With `max_idle` of at least one second such a bucket would refill to
    /// full on its next use, so removing it loses nothing.
    pub fn evict_idle(&self, max_idle: Duration, now: Duration) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|key, bucket| {
            let idle = now.saturating_sub(bucket.last_refill);
            if idle > max_idle {
                debug!(key = %key, idle_secs = idle.as_secs(), "Removing idle rate limit bucket");
                false
            } else {
                true
            }
        });
        before.saturating_sub(self.buckets.len())
    }

    /// Get number of tracked keys
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[async_trait]
impl BucketStore for MemoryBucketStore {
    async fn take(
        &self,
        key: &str,
        spec: BucketSpec,
        now: Duration,
    ) -> Result<Decision, StoreError> {
        if let Some(mut bucket) = self.buckets.get_mut(key) {
            bucket.reconfigure(spec);
            return Ok(bucket.try_take(now));
        }

        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::full(spec, now));
        bucket.reconfigure(spec);
        Ok(bucket.try_take(now))
    }

    async fn peek(&self, key: &str) -> Result<Option<TokenBucket>, StoreError> {
        Ok(self.buckets.get(key).map(|bucket| *bucket))
    }
}

/// Background task to evict idle buckets
pub async fn cleanup_task(
    store: Arc<MemoryBucketStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    max_idle: Duration,
    shutdown: CancellationToken,
) {
    let mut cleanup_interval = tokio::time::interval(interval);
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = cleanup_interval.tick() => {
                let removed = store.evict_idle(max_idle, clock.now());
                if removed > 0 {
                    debug!(removed, remaining = store.bucket_count(), "Evicted idle rate limit buckets");
                }
            }
        }
    }
}
