//! API Gateway service - wiring and lifecycle.
//!
//! Builds every component from configuration with an injected bucket store
//! and clock, then runs the ingress and admin servers, the worker pool and
//! the background tasks until shutdown.

use crate::auth::AuthGate;
use crate::domain::config::{BucketStoreConfig, GatewayConfig};
use crate::domain::error::GatewayError;
use crate::domain::routes::RouteTable;
use crate::ingress::{build_ingress_router, IngressState};
use crate::metrics::{GatewayMetrics, RequestRateMonitor};
use crate::pipeline::{Dispatcher, JobQueue, ProxyStage, WorkerPool};
use crate::ports::{Clock, SystemClock};
use crate::ratelimit::{
    memory, BucketStore, MemoryBucketStore, RateLimiter, RedisBucketStore, TokenBucketAlgorithm,
};
use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Idle bucket sweep period for the in-memory store
const BUCKET_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Configured, not yet running gateway
pub struct ApiGatewayService {
    config: GatewayConfig,
    routes: Arc<RouteTable>,
    metrics: Arc<GatewayMetrics>,
    queue: JobQueue,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    /// Set when buckets live in process and need idle eviction
    memory_store: Option<Arc<MemoryBucketStore>>,
}

impl ApiGatewayService {
    /// Create a gateway over the given bucket store and clock
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn BucketStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GatewayError> {
        // Validate configuration
        config
            .validate()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        let routes = Arc::new(
            RouteTable::from_groups(&config.routes.groups)
                .map_err(|e| GatewayError::Config(e.to_string()))?,
        );
        let metrics = Arc::new(GatewayMetrics::new());

        let algorithm = Arc::new(TokenBucketAlgorithm::new(
            store,
            Arc::clone(&clock),
            Arc::clone(&metrics),
        ));
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit, algorithm));
        let dispatcher = Arc::new(Dispatcher::new(
            limiter,
            AuthGate::new(&config.auth),
            Arc::clone(&routes),
            ProxyStage::new(&config.proxy)?,
            Arc::clone(&metrics),
        ));
        let queue = JobQueue::new(config.pipeline.queue_capacity);

        info!(
            routes = routes.len(),
            queue_capacity = queue.capacity(),
            workers = config.pipeline.workers,
            "API Gateway configured"
        );

        Ok(Self {
            config,
            routes,
            metrics,
            queue,
            dispatcher,
            clock,
            memory_store: None,
        })
    }

    /// Single-instance gateway with in-process buckets
    pub fn with_memory_store(config: GatewayConfig) -> Result<Self, GatewayError> {
        let store = Arc::new(MemoryBucketStore::new());
        let mut service = Self::new(
            config,
            Arc::clone(&store) as Arc<dyn BucketStore>,
            Arc::new(SystemClock),
        )?;
        service.memory_store = Some(store);
        Ok(service)
    }

    /// Build the store named in configuration, connecting to Redis if needed
    pub async fn from_config(config: GatewayConfig) -> Result<Self, GatewayError> {
        match &config.rate_limit.store {
            BucketStoreConfig::Memory => Self::with_memory_store(config),
            BucketStoreConfig::Redis { url, key_prefix } => {
                let store = RedisBucketStore::connect(url, key_prefix, config.rate_limit.idle_bucket_ttl)
                    .await
                    .map_err(|e| GatewayError::Store(e.to_string()))?;
                info!(prefix = %key_prefix, "Using Redis for rate limit buckets");
                Self::new(config, Arc::new(store), Arc::new(SystemClock))
            }
        }
    }

    /// Get metrics
    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn routes(&self) -> Arc<RouteTable> {
        Arc::clone(&self.routes)
    }

    /// Bind listeners and start every task.
    pub async fn start(self) -> Result<RunningGateway, GatewayError> {
        info!("Starting API Gateway...");
        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();

        let pool = WorkerPool::spawn(
            self.config.pipeline.workers,
            self.queue.clone(),
            Arc::clone(&self.dispatcher),
        );

        tasks.push(tokio::spawn(
            RequestRateMonitor::new(Arc::clone(&self.metrics)).run(shutdown.clone()),
        ));

        if let Some(store) = &self.memory_store {
            tasks.push(tokio::spawn(memory::cleanup_task(
                Arc::clone(store),
                Arc::clone(&self.clock),
                BUCKET_CLEANUP_INTERVAL,
                self.config.rate_limit.idle_bucket_ttl,
                shutdown.clone(),
            )));
        }

        // Start ingress server
        let ingress = build_ingress_router(
            &self.routes,
            IngressState {
                queue: self.queue.clone(),
                metrics: Arc::clone(&self.metrics),
                trust_forwarded_for: self.config.http.trust_forwarded_for,
                ingress_timeout: self.config.http.ingress_timeout,
                max_body_bytes: self.config.http.max_body_bytes,
            },
        );
        let (http_addr, http_task) =
            serve(self.config.http_addr(), ingress, shutdown.clone(), "ingress").await?;
        info!(addr = %http_addr, "Ingress server listening");

        // Start Admin server
        let mut admin_addr = None;
        let mut admin_task = None;
        if self.config.admin.enabled {
            let router = build_admin_router(Arc::clone(&self.metrics), Arc::clone(&self.routes), self.queue.clone());
            let (addr, task) = serve(self.config.admin_addr(), router, shutdown.clone(), "admin").await?;
            info!(addr = %addr, "Admin server listening");
            admin_addr = Some(addr);
            admin_task = Some(task);
        }

        info!("API Gateway started successfully");
        Ok(RunningGateway {
            http_addr,
            admin_addr,
            metrics: self.metrics,
            queue: self.queue,
            shutdown,
            pool,
            servers: std::iter::once(http_task).chain(admin_task).collect(),
            tasks,
        })
    }
}

/// Handle to a started gateway
pub struct RunningGateway {
    http_addr: SocketAddr,
    admin_addr: Option<SocketAddr>,
    metrics: Arc<GatewayMetrics>,
    queue: JobQueue,
    shutdown: CancellationToken,
    pool: WorkerPool,
    servers: Vec<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningGateway {
    /// Bound ingress address
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// Bound admin address, if enabled
    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Jobs waiting for a worker
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Stop accepting connections, drain in-flight jobs, stop background tasks.
    pub async fn shutdown(self) {
        info!("Shutting down API Gateway...");
        self.shutdown.cancel();

        for server in self.servers {
            if let Err(e) = server.await {
                error!(error = %e, "Server task failed");
            }
        }
        self.pool.shutdown().await;
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Background task failed");
            }
        }
        info!("API Gateway stopped");
    }
}

async fn serve(
    addr: SocketAddr,
    router: Router,
    shutdown: CancellationToken,
    name: &'static str,
) -> Result<(SocketAddr, JoinHandle<()>), GatewayError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| GatewayError::Bind(format!("{} {}: {}", name, addr, e)))?;
    let bound = listener
        .local_addr()
        .map_err(|e| GatewayError::Bind(format!("{} {}: {}", name, addr, e)))?;

    let task = tokio::spawn(async move {
        let result = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await;
        if let Err(e) = result {
            error!(server = name, error = %e, "Server error");
        }
    });
    Ok((bound, task))
}

/// Build Admin router
fn build_admin_router(
    metrics: Arc<GatewayMetrics>,
    routes: Arc<RouteTable>,
    queue: JobQueue,
) -> Router {
    let json_metrics = Arc::clone(&metrics);
    let text_metrics = metrics;

    Router::new()
        .route("/health", get(health_check))
        .route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&json_metrics);
                let queue = queue.clone();
                async move {
                    let mut body = metrics.to_json();
                    body["queue"] = serde_json::json!({
                        "depth": queue.len(),
                        "capacity": queue.capacity(),
                    });
                    Json(body)
                }
            }),
        )
        .route(
            "/metrics/prometheus",
            get(move || {
                let metrics = Arc::clone(&text_metrics);
                async move {
                    (
                        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                        metrics.to_prometheus(),
                    )
                }
            }),
        )
        .route(
            "/routes",
            get(move || {
                let routes = Arc::clone(&routes);
                async move {
                    let listing: Vec<_> = routes
                        .entries()
                        .map(|entry| {
                            serde_json::json!({
                                "topic": entry.topic(),
                                "method": entry.method.as_str(),
                                "path": entry.path_template,
                                "requires_auth": entry.requires_auth,
                                "rate_class": entry.rate_class,
                                "backend": entry.backend.to_string(),
                            })
                        })
                        .collect();
                    Json(listing)
                }
            }),
        )
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "service": "api-gateway",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}
