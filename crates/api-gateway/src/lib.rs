// Allow missing docs for internal items in development
#![allow(missing_docs)]

//! API Gateway - admission control and request dispatch for the social backends.
//!
//! Sits in front of the auth, user, posts and follow services. Every inbound
//! request is normalized into a job, queued, and run through a fixed
//! pipeline by a pool of workers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              API GATEWAY                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────────┐              ┌──────────────┐             │
//! │  │   Ingress (axum router)  │              │    Admin     │             │
//! │  │  one route per template  │              │ /health      │             │
//! │  └────────────┬─────────────┘              │ /metrics     │             │
//! │               │ Job + oneshot reply        └──────────────┘             │
//! │  ┌────────────┴─────────────┐                                           │
//! │  │   Bounded Job Queue      │  blocks when full, aborts on cancel       │
//! │  └────────────┬─────────────┘                                           │
//! │  ┌────────────┴─────────────────────────────────────────────┐           │
//! │  │                     Worker Pool                           │           │
//! │  │  Global → IP → Route → Auth → Feature → Proxy → Envelope  │           │
//! │  └────────────┬───────────────────────────┬─────────────────┘           │
//! │               │                           │                             │
//! │  ┌────────────┴─────────────┐   ┌─────────┴──────────┐                  │
//! │  │  Token Bucket Algorithm  │   │   reqwest client   │                  │
//! │  │  memory | redis (Lua)    │   │   fixed timeout    │                  │
//! │  └──────────────────────────┘   └─────────┬──────────┘                  │
//! └───────────────────────────────────────────┼─────────────────────────────┘
//!                                             │
//!         ┌───────────────┬───────────────────┼───────────────┐
//!         ▼               ▼                   ▼               ▼
//!    AuthService     UserService        PostsService    FollowService
//! ```
//!
//! # Rejection codes
//!
//! | code                     | status |
//! |--------------------------|--------|
//! | `RATE_LIMIT_MAX_REQUEST` | 429    |
//! | `RATE_LIMIT_IP`          | 429    |
//! | `RATE_LIMIT_FEATURE`     | 429    |
//! | `UNAUTHENTICATED`        | 401    |
//! | `NO_ROUTE`               | 502    |
//! | `BAD_GATEWAY`            | 502    |
//! | `GATEWAY_TIMEOUT`        | 504    |
//! | `BUILD_REQUEST_FAILED`   | 500    |
//! | `UPSTREAM_ERROR`         | 200    |
//! | `UNAVAILABLE`            | 503    |
//! | `PAYLOAD_TOO_LARGE`      | 413    |
//!
//! # Usage
//!
//! ```ignore
//! use api_gateway::{ApiGatewayService, GatewayConfig};
//!
//! let service = ApiGatewayService::from_config(GatewayConfig::default()).await?;
//! let running = service.start().await?;
//! tokio::signal::ctrl_c().await?;
//! running.shutdown().await;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod auth;
pub mod domain;
pub mod ingress;
pub mod metrics;
pub mod pipeline;
pub mod ports;
pub mod ratelimit;
pub mod service;

// Re-exports for public API
pub use auth::{AuthError, AuthGate, Claims};
pub use domain::config::{BucketStoreConfig, ConfigError, GatewayConfig};
pub use domain::envelope::{Envelope, EnvelopeStatus, JobResult};
pub use domain::error::{ApiError, ErrorCode, GatewayError};
pub use domain::job::{Job, RouteKey};
pub use domain::routes::{RouteEntry, RouteTable, ServiceGroup};
pub use metrics::{GatewayMetrics, RequestRateMonitor};
pub use pipeline::{Dispatcher, EnqueueError, JobQueue, ProxyStage, WorkerPool};
pub use ports::{Clock, ManualClock, SystemClock};
pub use ratelimit::{
    AdmissionTier, BucketStore, MemoryBucketStore, RateLimiter, RedisBucketStore, StoreError,
    TokenBucket, TokenBucketAlgorithm,
};
pub use service::{ApiGatewayService, RunningGateway};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
