//! The three limiter tiers: key derivation and limit selection.

use super::bucket::TokenBucketAlgorithm;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

/// Identity used by the feature tier when the caller is not authenticated
pub const ANONYMOUS: &str = "anonymous";

/// Single bucket shared by every request
pub struct GlobalLimiter {
    algorithm: Arc<TokenBucketAlgorithm>,
    limit: u32,
}

impl GlobalLimiter {
    pub const KEY: &'static str = "global";

    pub fn new(algorithm: Arc<TokenBucketAlgorithm>, limit: u32) -> Self {
        Self { algorithm, limit }
    }

    pub async fn allow(&self) -> bool {
        self.algorithm.allow(Self::KEY, self.limit).await
    }
}

/// One bucket per source address
pub struct IpLimiter {
    algorithm: Arc<TokenBucketAlgorithm>,
    limit: u32,
    whitelist: HashSet<IpAddr>,
}

impl IpLimiter {
    pub fn new(algorithm: Arc<TokenBucketAlgorithm>, limit: u32, whitelist: &[IpAddr]) -> Self {
        Self {
            algorithm,
            limit,
            whitelist: whitelist.iter().copied().collect(),
        }
    }

    pub fn key(ip: IpAddr) -> String {
        format!("ip:{}", ip)
    }

    pub async fn allow(&self, ip: IpAddr) -> bool {
        if self.whitelist.contains(&ip) {
            return true;
        }
        self.algorithm.allow(&Self::key(ip), self.limit).await
    }
}

/// One bucket per (identity, rate class)
pub struct FeatureLimiter {
    algorithm: Arc<TokenBucketAlgorithm>,
    limits: HashMap<String, u32>,
    default_limit: u32,
}

impl FeatureLimiter {
    pub fn new(
        algorithm: Arc<TokenBucketAlgorithm>,
        limits: HashMap<String, u32>,
        default_limit: u32,
    ) -> Self {
        Self {
            algorithm,
            limits,
            default_limit,
        }
    }

    pub fn key(identity: Option<&str>, rate_class: &str) -> String {
        format!("feature:{}:{}", identity.unwrap_or(ANONYMOUS), rate_class)
    }

    /// Configured limit, falling back to the default for unknown classes
    pub fn limit_for(&self, rate_class: &str) -> u32 {
        self.limits
            .get(rate_class)
            .copied()
            .unwrap_or(self.default_limit)
    }

    pub async fn allow(&self, identity: Option<&str>, rate_class: &str) -> bool {
        self.algorithm
            .allow(&Self::key(identity, rate_class), self.limit_for(rate_class))
            .await
    }
}
