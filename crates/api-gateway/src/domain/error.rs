//! API Gateway error types with machine-readable rejection codes.
//!
//! Every terminal failure of the dispatch pipeline maps to exactly one
//! [`ErrorCode`], which fixes both the `error.code` string in the response
//! envelope and the outer HTTP status.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable error code surfaced in `error.code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Global (gateway-wide) token bucket exhausted
    RateLimitMaxRequest,
    /// Per-IP token bucket exhausted
    RateLimitIp,
    /// Per-identity, per-rate-class token bucket exhausted
    RateLimitFeature,
    /// Missing, malformed, expired or otherwise invalid credential
    Unauthenticated,
    /// No route entry for the request
    NoRoute,
    /// Backend unreachable
    BadGateway,
    /// Backend did not answer within the proxy timeout
    GatewayTimeout,
    /// Outbound request could not be constructed
    BuildRequestFailed,
    /// Backend answered with status >= 400
    UpstreamError,
    /// Gateway is shutting down or dropped the job
    Unavailable,
    /// Inbound body exceeds the configured maximum
    PayloadTooLarge,
}

impl ErrorCode {
    /// Wire representation
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RateLimitMaxRequest => "RATE_LIMIT_MAX_REQUEST",
            ErrorCode::RateLimitIp => "RATE_LIMIT_IP",
            ErrorCode::RateLimitFeature => "RATE_LIMIT_FEATURE",
            ErrorCode::Unauthenticated => "UNAUTHENTICATED",
            ErrorCode::NoRoute => "NO_ROUTE",
            ErrorCode::BadGateway => "BAD_GATEWAY",
            ErrorCode::GatewayTimeout => "GATEWAY_TIMEOUT",
            ErrorCode::BuildRequestFailed => "BUILD_REQUEST_FAILED",
            ErrorCode::UpstreamError => "UPSTREAM_ERROR",
            ErrorCode::Unavailable => "UNAVAILABLE",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
        }
    }

    /// Outer transport status used when this code terminates a job.
    ///
    /// Upstream errors are reported inside a 200 envelope.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::RateLimitMaxRequest | ErrorCode::RateLimitIp | ErrorCode::RateLimitFeature => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorCode::NoRoute | ErrorCode::BadGateway => StatusCode::BAD_GATEWAY,
            ErrorCode::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::BuildRequestFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::UpstreamError => StatusCode::OK,
            ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error object carried in the response envelope
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    /// Machine-readable code
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// Backend status, only for [`ErrorCode::UpstreamError`]
    pub upstream_status: Option<u16>,
}

impl ApiError {
    /// Create a new API error
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            upstream_status: None,
        }
    }

    pub fn rate_limited(code: ErrorCode) -> Self {
        let message = match code {
            ErrorCode::RateLimitIp => "Too Many Requests (IP)",
            ErrorCode::RateLimitFeature => "Too Many Requests (Feature)",
            _ => "Too Many Requests",
        };
        Self::new(code, message)
    }

    /// Every authentication failure collapses to this one error.
    pub fn unauthenticated() -> Self {
        Self::new(ErrorCode::Unauthenticated, "Unauthorized")
    }

    pub fn no_route(topic: &str) -> Self {
        Self::new(
            ErrorCode::NoRoute,
            format!("No internal service for topic {}", topic),
        )
    }

    pub fn bad_gateway(details: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::BadGateway,
            format!("Internal service unreachable: {}", details),
        )
    }

    pub fn gateway_timeout(timeout_ms: u128) -> Self {
        Self::new(
            ErrorCode::GatewayTimeout,
            format!("Internal service did not respond within {}ms", timeout_ms),
        )
    }

    pub fn build_request_failed(details: impl fmt::Display) -> Self {
        Self::new(ErrorCode::BuildRequestFailed, details.to_string())
    }

    /// Backend replied with an error status
    pub fn upstream(status: u16, body: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::UpstreamError,
            message: body.into(),
            upstream_status: Some(status),
        }
    }

    pub fn unavailable(details: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, details)
    }

    pub fn payload_too_large(limit: usize) -> Self {
        Self::new(
            ErrorCode::PayloadTooLarge,
            format!("Request body exceeds {} bytes", limit),
        )
    }

    /// Outer HTTP status for this error
    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl Serialize for ApiError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let len = if self.upstream_status.is_some() { 3 } else { 2 };
        let mut state = serializer.serialize_struct("ApiError", len)?;
        state.serialize_field("code", &self.code)?;
        state.serialize_field("message", &self.message)?;
        if let Some(status) = self.upstream_status {
            state.serialize_field("upstream_status", &status)?;
        }
        state.end()
    }
}

impl<'de> Deserialize<'de> for ApiError {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct ErrorHelper {
            code: ErrorCode,
            message: String,
            #[serde(default)]
            upstream_status: Option<u16>,
        }

        let helper = ErrorHelper::deserialize(deserializer)?;
        Ok(ApiError {
            code: helper.code,
            message: helper.message,
            upstream_status: helper.upstream_status,
        })
    }
}

/// Gateway-level errors (service lifecycle, internal use)
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Server socket bind error
    #[error("server bind error: {0}")]
    Bind(String),

    /// Shared rate-limit store could not be reached at startup
    #[error("rate limit store error: {0}")]
    Store(String),

    /// Upstream HTTP client could not be built
    #[error("http client error: {0}")]
    Client(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}
