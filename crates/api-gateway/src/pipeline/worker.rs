//! Worker pool and the per-job admission, auth, routing and proxy pipeline.

use super::proxy::{normalize, ProxyError, ProxyStage, UpstreamCall, UpstreamReply};
use super::queue::JobQueue;
use crate::auth::AuthGate;
use crate::domain::correlation::RequestId;
use crate::domain::envelope::JobResult;
use crate::domain::error::{ApiError, ErrorCode};
use crate::domain::job::Job;
use crate::domain::routes::RouteTable;
use crate::metrics::GatewayMetrics;
use crate::ratelimit::RateLimiter;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Runs one job through every stage and replies exactly once.
pub struct Dispatcher {
    limiter: Arc<RateLimiter>,
    auth: AuthGate,
    routes: Arc<RouteTable>,
    proxy: ProxyStage,
    metrics: Arc<GatewayMetrics>,
}

impl Dispatcher {
    pub fn new(
        limiter: Arc<RateLimiter>,
        auth: AuthGate,
        routes: Arc<RouteTable>,
        proxy: ProxyStage,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            limiter,
            auth,
            routes,
            proxy,
            metrics,
        }
    }

    /// Process a dequeued job.
    ///
    /// Completion metrics count only results that reach the caller. Ingress
    /// accounts for callers that timed out or disconnected.
    pub async fn process(&self, job: Job) {
        if job.cancel.is_cancelled() {
            debug!(topic = %job.topic_label(), "Caller gone before processing, dropping job");
            return;
        }

        let request_id = RequestId::new();
        let started = Instant::now();
        let outcome = self.execute(&job, request_id).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let (result, code) = match outcome {
            Ok(reply) => {
                let code = (reply.status.as_u16() >= 400).then_some(ErrorCode::UpstreamError);
                if code.is_some() {
                    debug!(
                        %request_id,
                        upstream_status = reply.status.as_u16(),
                        latency_ms,
                        "Backend returned an error status"
                    );
                }
                (normalize(&reply, request_id, latency_ms), code)
            }
            Err(e) => {
                let code = e.code;
                (JobResult::error(request_id, latency_ms, e), Some(code))
            }
        };

        if job.respond(result) {
            self.metrics.record_completion(code, latency_ms);
        } else {
            debug!(%request_id, "Caller stopped waiting, result discarded");
        }
    }

    async fn execute(&self, job: &Job, request_id: RequestId) -> Result<UpstreamReply, ApiError> {
        // Global and IP tiers
        if let Err(tier) = self.limiter.check_source(job.client_ip).await {
            debug!(%request_id, client_ip = %job.client_ip, tier = tier.as_str(), "Rate limited");
            self.metrics.record_rejection(tier);
            return Err(ApiError::rate_limited(tier.error_code()));
        }

        let route = job.route.as_ref();
        let entry = match route.and_then(|key| self.routes.get(&key.topic)) {
            Some(entry) => Arc::clone(entry),
            None => {
                let topic = job.topic_label();
                error!(%request_id, topic = %topic, "No route for request");
                return Err(ApiError::no_route(&topic));
            }
        };

        let identity = if entry.requires_auth {
            match self.auth.verify(job.credential.as_deref()) {
                Ok(claims) => Some(claims.subject),
                Err(_) => {
                    debug!(%request_id, topic = entry.topic(), "Unauthenticated");
                    return Err(ApiError::unauthenticated());
                }
            }
        } else {
            None
        };

        if let Err(tier) = self
            .limiter
            .check_feature(identity.as_deref(), &entry.rate_class)
            .await
        {
            debug!(
                %request_id,
                topic = entry.topic(),
                rate_class = %entry.rate_class,
                tier = tier.as_str(),
                "Rate limited"
            );
            self.metrics.record_rejection(tier);
            return Err(ApiError::rate_limited(tier.error_code()));
        }
        self.metrics.record_admitted();

        let params = route.map(|key| key.params.as_slice()).unwrap_or_default();
        let mut path_and_query = entry
            .resolve_path(params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .map_err(|e| {
                warn!(%request_id, topic = entry.topic(), error = %e, "Path does not resolve to a route");
                ApiError::no_route(entry.topic())
            })?;
        if let Some(query) = job.query.as_deref().filter(|q| !q.is_empty()) {
            path_and_query.push('?');
            path_and_query.push_str(query);
        }

        let call = UpstreamCall {
            entry: &entry,
            method: job.method.clone(),
            path_and_query,
            headers: &job.headers,
            body: job.body.clone(),
            request_id,
            identity: identity.as_deref(),
            credential: job.credential.as_deref(),
        };

        match self.proxy.forward(call).await {
            Ok(reply) => {
                debug!(
                    %request_id,
                    topic = entry.topic(),
                    upstream_status = reply.status.as_u16(),
                    "Proxied"
                );
                Ok(reply)
            }
            Err(e) => {
                match &e {
                    ProxyError::Build(details) => {
                        error!(%request_id, topic = entry.topic(), error = %details, "Failed to build upstream request")
                    }
                    other => {
                        warn!(%request_id, topic = entry.topic(), backend = %entry.backend, error = %other, "Upstream call failed")
                    }
                }
                Err(e.into_api_error())
            }
        }
    }
}

/// Fixed set of workers draining the job queue
pub struct WorkerPool {
    queue: JobQueue,
    handles: Vec<JoinHandle<()>>,
    metrics: Arc<GatewayMetrics>,
}

impl WorkerPool {
    /// Start `workers` tasks
    pub fn spawn(workers: usize, queue: JobQueue, dispatcher: Arc<Dispatcher>) -> Self {
        let metrics = Arc::clone(&dispatcher.metrics);
        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let queue = queue.clone();
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    debug!(worker_id, "Worker started");
                    while let Some(job) = queue.dequeue().await {
                        dispatcher.process(job).await;
                    }
                    debug!(worker_id, "Worker stopped");
                })
            })
            .collect();

        Self {
            queue,
            handles,
            metrics,
        }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Close the queue, let workers finish queued jobs, then refuse leftovers.
    pub async fn shutdown(self) {
        self.queue.close();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task failed");
            }
        }

        let mut refused = 0usize;
        while let Some(job) = self.queue.dequeue().await {
            let result = JobResult::error(
                RequestId::new(),
                0,
                ApiError::unavailable("Gateway is shutting down"),
            );
            if job.respond(result) {
                self.metrics.record_unavailable();
            }
            refused += 1;
        }
        info!(refused, "Worker pool stopped");
    }
}
