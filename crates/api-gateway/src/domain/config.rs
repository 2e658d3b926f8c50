//! Gateway configuration with validation.

use crate::domain::routes::{default_service_groups, ServiceGroup};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Ingress HTTP server configuration
    pub http: HttpConfig,
    /// Admin server configuration (localhost only by default)
    pub admin: AdminConfig,
    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
    /// Job queue and worker pool sizing
    pub pipeline: PipelineConfig,
    /// Upstream proxy configuration
    pub proxy: ProxyConfig,
    /// Bearer token verification
    pub auth: AuthConfig,
    /// Service groups making up the route table
    pub routes: RoutesConfig,
}

impl GatewayConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admin.enabled && self.http.port != 0 && self.http.port == self.admin.port {
            return Err(ConfigError::DuplicatePorts);
        }

        if self.rate_limit.global_limit == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "global_limit cannot be 0".into(),
            ));
        }
        if self.rate_limit.ip_limit == 0 {
            return Err(ConfigError::InvalidRateLimit("ip_limit cannot be 0".into()));
        }
        if self.rate_limit.default_feature_limit == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "default_feature_limit cannot be 0".into(),
            ));
        }
        if let Some((class, _)) = self
            .rate_limit
            .feature_limits
            .iter()
            .find(|(_, limit)| **limit == 0)
        {
            return Err(ConfigError::InvalidRateLimit(format!(
                "feature limit for {:?} cannot be 0",
                class
            )));
        }

        if self.pipeline.queue_capacity == 0 {
            return Err(ConfigError::InvalidLimit(
                "queue_capacity cannot be 0".into(),
            ));
        }
        if self.pipeline.workers == 0 {
            return Err(ConfigError::InvalidLimit("workers cannot be 0".into()));
        }

        if self.proxy.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "proxy timeout cannot be 0".into(),
            ));
        }
        if self.http.ingress_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "ingress timeout cannot be 0".into(),
            ));
        }

        if self.auth.jwt_secret.is_empty() {
            return Err(ConfigError::Invalid("jwt_secret cannot be empty".into()));
        }

        let mut topics = HashSet::new();
        for group in &self.routes.groups {
            for endpoint in &group.endpoints {
                let topic = format!("{}/{}", group.name, endpoint.name);
                if !topics.insert(topic.clone()) {
                    return Err(ConfigError::DuplicateTopic(topic));
                }
            }
        }

        Ok(())
    }

    /// Get ingress bind address
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.host, self.http.port)
    }

    /// Get Admin server bind address
    pub fn admin_addr(&self) -> SocketAddr {
        SocketAddr::new(self.admin.host, self.admin.port)
    }
}

/// Ingress HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 8080)
    pub port: u16,
    /// Honour X-Forwarded-For / X-Real-IP when deriving the client IP.
    /// Only safe behind a trusted reverse proxy.
    pub trust_forwarded_for: bool,
    /// Upper bound on enqueue + reply wait for a single inbound request
    #[serde(with = "humantime_serde")]
    pub ingress_timeout: Duration,
    /// Max inbound body size in bytes
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 8080,
            trust_forwarded_for: false,
            ingress_timeout: Duration::from_secs(10),
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Admin server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Bind address (localhost only by default for security)
    pub host: IpAddr,
    /// Port (default: 8081)
    pub port: u16,
    /// Enable admin server
    pub enabled: bool,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8081,
            enabled: true,
        }
    }
}

/// Where token buckets live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BucketStoreConfig {
    /// In-process buckets (single-instance deployment)
    Memory,
    /// Shared Redis hashes (multi-instance deployment)
    Redis {
        url: String,
        #[serde(default = "default_key_prefix")]
        key_prefix: String,
    },
}

fn default_key_prefix() -> String {
    "ratelimit".to_string()
}

impl Default for BucketStoreConfig {
    fn default() -> Self {
        BucketStoreConfig::Memory
    }
}

/// Rate limiting configuration (all limits are requests per second)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,
    /// Ceiling on total admitted requests across all clients
    pub global_limit: u32,
    /// Ceiling per client IP
    pub ip_limit: u32,
    /// Ceiling per (identity, rate class)
    pub feature_limits: HashMap<String, u32>,
    /// Limit for a rate class missing from `feature_limits`
    pub default_feature_limit: u32,
    /// IPs exempt from the per-IP tier
    pub whitelist: Vec<IpAddr>,
    /// Bucket storage backend
    pub store: BucketStoreConfig,
    /// Buckets idle this long are dropped (memory) or expire (redis)
    #[serde(with = "humantime_serde")]
    pub idle_bucket_ttl: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let feature_limits = [
            ("auth", 1),
            ("users", 5),
            ("search", 3),
            ("posts", 5),
            ("post_writes", 1),
            ("follow", 3),
        ]
        .into_iter()
        .map(|(class, limit)| (class.to_string(), limit))
        .collect();

        Self {
            enabled: true,
            global_limit: 1000,
            ip_limit: 20,
            feature_limits,
            default_feature_limit: 1,
            whitelist: Vec::new(),
            store: BucketStoreConfig::Memory,
            idle_bucket_ttl: Duration::from_secs(600),
        }
    }
}

impl RateLimitConfig {
    /// Limit applied to a rate class
    pub fn feature_limit(&self, rate_class: &str) -> u32 {
        self.feature_limits
            .get(rate_class)
            .copied()
            .unwrap_or(self.default_feature_limit)
    }
}

/// Job queue and worker pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bounded queue capacity, fixed for the life of the process
    pub queue_capacity: usize,
    /// Number of pipeline workers
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            workers: 4,
        }
    }
}

/// Upstream proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Per-call timeout covering connect, send and body read
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// TCP connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(1),
        }
    }
}

/// Bearer token verification (HS256)
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared HMAC secret
    pub jwt_secret: String,
    /// Clock skew tolerance for `exp`
    pub leeway_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me".to_string(),
            leeway_secs: 0,
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

/// Route table source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutesConfig {
    pub groups: Vec<ServiceGroup>,
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            groups: default_service_groups(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Ingress and admin servers using the same port
    #[error("duplicate ports configured")]
    DuplicatePorts,
    /// Invalid rate limiting configuration
    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// Two endpoints share a topic
    #[error("duplicate route topic: {0}")]
    DuplicateTopic(String),
    /// Malformed route declaration
    #[error("invalid route: {0}")]
    InvalidRoute(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Humantime serde module for Duration serialization
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .ok()
                .and_then(|m| m.checked_mul(60))
                .map(Duration::from_secs)
                .ok_or("invalid minutes")
        } else {
            // Try parsing as plain seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
