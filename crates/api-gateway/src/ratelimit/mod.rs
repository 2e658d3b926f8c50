//! Multi-tier token bucket rate limiting.
//!
//! Tiers are checked in a fixed order and the first rejection wins:
//! global, then per-IP (both before authentication), then per-feature
//! (after authentication, keyed by identity and rate class).

pub mod bucket;
pub mod memory;
pub mod redis_store;
pub mod tiers;

pub use bucket::{BucketSpec, BucketStore, Decision, StoreError, TokenBucket, TokenBucketAlgorithm};
pub use memory::MemoryBucketStore;
pub use redis_store::RedisBucketStore;
pub use tiers::{FeatureLimiter, GlobalLimiter, IpLimiter, ANONYMOUS};

use crate::domain::config::RateLimitConfig;
use crate::domain::error::ErrorCode;
use std::net::IpAddr;
use std::sync::Arc;

/// Limiter tier that rejected a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdmissionTier {
    Global,
    Ip,
    Feature,
}

impl AdmissionTier {
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            AdmissionTier::Global => ErrorCode::RateLimitMaxRequest,
            AdmissionTier::Ip => ErrorCode::RateLimitIp,
            AdmissionTier::Feature => ErrorCode::RateLimitFeature,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            AdmissionTier::Global => "global",
            AdmissionTier::Ip => "ip",
            AdmissionTier::Feature => "feature",
        }
    }
}

/// All three tiers over one algorithm instance
pub struct RateLimiter {
    enabled: bool,
    global: GlobalLimiter,
    ip: IpLimiter,
    feature: FeatureLimiter,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, algorithm: Arc<TokenBucketAlgorithm>) -> Self {
        Self {
            enabled: config.enabled,
            global: GlobalLimiter::new(Arc::clone(&algorithm), config.global_limit),
            ip: IpLimiter::new(Arc::clone(&algorithm), config.ip_limit, &config.whitelist),
            feature: FeatureLimiter::new(
                algorithm,
                config.feature_limits.clone(),
                config.default_feature_limit,
            ),
        }
    }

    /// Pre-authentication tiers. The IP tier is never consulted when the
    /// global tier rejects.
    pub async fn check_source(&self, ip: IpAddr) -> Result<(), AdmissionTier> {
        if !self.enabled {
            return Ok(());
        }
        if !self.global.allow().await {
            return Err(AdmissionTier::Global);
        }
        if !self.ip.allow(ip).await {
            return Err(AdmissionTier::Ip);
        }
        Ok(())
    }

    /// Post-authentication tier
    pub async fn check_feature(
        &self,
        identity: Option<&str>,
        rate_class: &str,
    ) -> Result<(), AdmissionTier> {
        if !self.enabled {
            return Ok(());
        }
        if !self.feature.allow(identity, rate_class).await {
            return Err(AdmissionTier::Feature);
        }
        Ok(())
    }
}
