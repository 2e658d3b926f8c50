//! Domain types for the API Gateway.
//!
//! Configuration, the route table, jobs and their results, and error codes.

pub mod config;
pub mod correlation;
pub mod envelope;
pub mod error;
pub mod job;
pub mod routes;

// Re-exports for convenience
pub use config::{
    AdminConfig, AuthConfig, BucketStoreConfig, ConfigError, GatewayConfig, HttpConfig,
    PipelineConfig, ProxyConfig, RateLimitConfig, RoutesConfig,
};
pub use correlation::{RequestId, TraceId};
pub use envelope::{Envelope, EnvelopeStatus, JobResult};
pub use error::{ApiError, ErrorCode, GatewayError};
pub use job::{Job, RouteKey};
pub use routes::{
    default_service_groups, BackendAddr, EndpointConfig, PathParamError, RouteEntry, RouteMatch,
    RouteTable, ServiceGroup,
};
