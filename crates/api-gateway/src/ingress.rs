//! HTTP ingress: one axum route per template in the route table.
//!
//! Handlers only normalize the request into a [`Job`], enqueue it and wait
//! for the reply. All admission and routing decisions happen in workers.

use crate::domain::correlation::RequestId;
use crate::domain::envelope::JobResult;
use crate::domain::error::ApiError;
use crate::domain::job::{Job, RouteKey};
use crate::domain::routes::{RouteEntry, RouteTable};
use crate::metrics::GatewayMetrics;
use crate::pipeline::{EnqueueError, JobQueue};
use axum::{
    body::Body,
    extract::{ConnectInfo, RawPathParams, Request, State},
    response::{IntoResponse, Response},
    routing::{MethodFilter, MethodRouter},
    Router,
};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

/// Shared by every ingress handler
#[derive(Clone)]
pub struct IngressState {
    pub queue: JobQueue,
    pub metrics: Arc<GatewayMetrics>,
    pub trust_forwarded_for: bool,
    pub ingress_timeout: Duration,
    pub max_body_bytes: usize,
}

/// Build the ingress router from the route table.
pub fn build_ingress_router(routes: &RouteTable, state: IngressState) -> Router {
    // Several endpoints may share a template with different methods
    let mut by_template: BTreeMap<String, Vec<Arc<RouteEntry>>> = BTreeMap::new();
    for entry in routes.entries() {
        by_template
            .entry(entry.router_path())
            .or_default()
            .push(Arc::clone(entry));
    }

    let mut router = Router::new();
    for (path, entries) in by_template {
        let mut method_router: MethodRouter<IngressState> =
            MethodRouter::new().fallback(handle_unrouted);
        for entry in entries {
            let filter = match MethodFilter::try_from(entry.method.clone()) {
                Ok(filter) => filter,
                Err(_) => {
                    warn!(topic = entry.topic(), method = %entry.method, "Method cannot be routed, skipping");
                    continue;
                }
            };
            let topic = entry.topic().to_string();
            method_router = method_router.on(
                filter,
                move |State(state): State<IngressState>, params: RawPathParams, request: Request| {
                    let route = RouteKey {
                        topic: topic.clone(),
                        params: params
                            .iter()
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .collect(),
                    };
                    async move { dispatch(state, Some(route), request).await }
                },
            );
        }
        router = router.route(&path, method_router);
    }

    router
        .fallback(handle_unrouted)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Requests matching no template still go through the pipeline so the
/// global and IP tiers apply; they end in `NO_ROUTE`.
async fn handle_unrouted(State(state): State<IngressState>, request: Request) -> Response {
    dispatch(state, None, request).await
}

/// Counts the request as cancelled if the handler is dropped before it
/// produced a response.
struct DisconnectGuard {
    metrics: Arc<GatewayMetrics>,
    armed: bool,
}

impl DisconnectGuard {
    fn new(metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            metrics,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!("Client went away before a reply");
            self.metrics.record_cancelled();
        }
    }
}

async fn dispatch(state: IngressState, route: Option<RouteKey>, request: Request) -> Response {
    state.metrics.record_received();
    let guard = DisconnectGuard::new(Arc::clone(&state.metrics));
    let response = dispatch_inner(state, route, request).await;
    guard.disarm();
    response
}

async fn dispatch_inner(state: IngressState, route: Option<RouteKey>, request: Request) -> Response {
    let received = Instant::now();
    let client_ip = extract_client_ip(&request, state.trust_forwarded_for);

    // Bounded read; a larger body never becomes a job
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            debug!(client_ip = %client_ip, error = %e, "Rejected request body");
            state.metrics.record_oversize();
            let latency_ms = received.elapsed().as_millis() as u64;
            let error = ApiError::payload_too_large(state.max_body_bytes);
            return JobResult::error(RequestId::new(), latency_ms, error).into_response();
        }
    };

    // Fires if this handler is dropped because the client went away
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let (job, reply) = Job::new(
        parts.method,
        parts.uri.path().to_string(),
        parts.uri.query().map(str::to_owned),
        parts.headers,
        body,
        client_ip,
        route,
        cancel.clone(),
    );

    let wait = async {
        state.queue.enqueue(job).await.map_err(|e| match e {
            EnqueueError::Closed => ApiError::unavailable("Gateway is shutting down"),
            EnqueueError::Cancelled => ApiError::unavailable("Request cancelled"),
        })?;
        reply
            .await
            .map_err(|_| ApiError::unavailable("Request dropped without a reply"))
    };

    let error = match tokio::time::timeout(state.ingress_timeout, wait).await {
        Ok(Ok(result)) => return result.into_response(),
        Ok(Err(error)) => error,
        Err(_) => {
            cancel.cancel();
            warn!(
                client_ip = %client_ip,
                timeout_ms = state.ingress_timeout.as_millis() as u64,
                "Timed out waiting for the pipeline"
            );
            ApiError::unavailable("Timed out waiting for the pipeline")
        }
    };

    state.metrics.record_unavailable();
    let latency_ms = received.elapsed().as_millis() as u64;
    JobResult::error(RequestId::new(), latency_ms, error).into_response()
}

/// Client address for the IP tier.
///
/// Forwarding headers are only honoured behind a trusted proxy.
fn extract_client_ip(req: &Request<Body>, trust_forwarded_for: bool) -> IpAddr {
    if trust_forwarded_for {
        // Take the first IP (original client)
        if let Some(ip) = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok())
        {
            return ip;
        }

        if let Some(ip) = req
            .headers()
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
        {
            return ip;
        }
    }

    // Fall back to connection info
    if let Some(connect_info) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return connect_info.0.ip();
    }

    // Default to localhost if we can't determine IP
    IpAddr::from([127, 0, 0, 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::routes::default_service_groups;
    use axum::http::{HeaderValue, Method, StatusCode};
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;

    fn state(queue: JobQueue) -> IngressState {
        IngressState {
            queue,
            metrics: Arc::new(GatewayMetrics::new()),
            trust_forwarded_for: false,
            ingress_timeout: Duration::from_secs(2),
            max_body_bytes: 1024,
        }
    }

    fn request(method: Method, uri: &str) -> Request<Body> {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_client_ip_ignores_forwarded_headers_by_default() {
        let mut req = request(Method::GET, "/");
        req.headers_mut()
            .insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 7], 5555))));

        assert_eq!(extract_client_ip(&req, false), IpAddr::from([192, 0, 2, 7]));
        assert_eq!(extract_client_ip(&req, true), IpAddr::from([203, 0, 113, 9]));
    }

    #[test]
    fn test_client_ip_real_ip_header() {
        let mut req = request(Method::GET, "/");
        req.headers_mut()
            .insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));
        assert_eq!(extract_client_ip(&req, true), IpAddr::from([198, 51, 100, 4]));
        assert_eq!(extract_client_ip(&req, false), IpAddr::from([127, 0, 0, 1]));
    }

    /// Take one job off the queue, answer it with an empty success
    /// envelope and hand back what the worker saw.
    async fn serve_one(queue: JobQueue) -> (Option<RouteKey>, Option<String>) {
        let job = queue.dequeue().await.unwrap();
        let seen = (job.route.clone(), job.query.clone());
        let envelope = crate::domain::envelope::Envelope::success(
            RequestId::new(),
            0,
            serde_json::Value::Null,
        );
        job.respond(JobResult::from_envelope(StatusCode::OK, &envelope));
        seen
    }

    #[tokio::test]
    async fn test_templated_route_captures_params_and_query() {
        let queue = JobQueue::new(4);
        let table = RouteTable::from_groups(&default_service_groups()).unwrap();
        let router = build_ingress_router(&table, state(queue.clone()));

        let worker = tokio::spawn(serve_one(queue));
        let response = router
            .oneshot(request(Method::GET, "/users/42/posts?page=2"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-gateway"], "api-gateway");

        let (route, query) = worker.await.unwrap();
        let route = route.unwrap();
        assert_eq!(route.topic, "PostsService/GetUserPosts");
        assert_eq!(route.params, vec![("user_id".to_string(), "42".to_string())]);
        assert_eq!(query.as_deref(), Some("page=2"));
    }

    #[tokio::test]
    async fn test_unknown_path_enqueued_without_route() {
        let queue = JobQueue::new(4);
        let table = RouteTable::from_groups(&default_service_groups()).unwrap();
        let router = build_ingress_router(&table, state(queue.clone()));

        let worker = tokio::spawn(serve_one(queue));
        let response = router
            .oneshot(request(Method::GET, "/definitely/not/here"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(worker.await.unwrap().0.is_none());
    }

    #[tokio::test]
    async fn test_wrong_method_on_known_path_is_unrouted() {
        let queue = JobQueue::new(4);
        let table = RouteTable::from_groups(&default_service_groups()).unwrap();
        let router = build_ingress_router(&table, state(queue.clone()));

        let worker = tokio::spawn(serve_one(queue));
        // GetFollowers is GET only
        let response = router
            .oneshot(request(Method::PUT, "/follows/1/followers"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(worker.await.unwrap().0.is_none());
    }

    #[tokio::test]
    async fn test_closed_queue_yields_unavailable() {
        let queue = JobQueue::new(1);
        queue.close();
        let table = RouteTable::from_groups(&default_service_groups()).unwrap();
        let router = build_ingress_router(&table, state(queue));

        let response = router.oneshot(request(Method::GET, "/me")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_ingress_timeout() {
        let queue = JobQueue::new(1);
        let table = RouteTable::from_groups(&default_service_groups()).unwrap();
        let mut st = state(queue.clone());
        st.ingress_timeout = Duration::from_millis(50);
        let router = build_ingress_router(&table, st);

        // Nobody drains the queue
        let response = router.oneshot(request(Method::GET, "/me")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        // The abandoned job is still queued but marked cancelled
        let job = queue.dequeue().await.unwrap();
        assert!(job.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_oversize_body_gets_error_envelope() {
        let queue = JobQueue::new(4);
        let table = RouteTable::from_groups(&default_service_groups()).unwrap();
        let st = state(queue.clone());
        let metrics = Arc::clone(&st.metrics);
        let router = build_ingress_router(&table, st);

        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/posts")
            .header("content-type", "application/json")
            .body(Body::from(vec![b'x'; 2048]))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(response.headers()["x-gateway"], "api-gateway");
        assert_eq!(response.headers()["content-type"], "application/json");
        let request_id = response.headers()["x-request-id"].to_str().unwrap().to_string();

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ERROR");
        assert_eq!(body["error"]["code"], "PAYLOAD_TOO_LARGE");
        assert_eq!(body["request_id"], request_id.as_str());
        assert!(body["data"].is_null());

        // Never queued
        assert!(queue.is_empty());
        assert_eq!(metrics.oversize_bodies.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.requests_cancelled.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_body_at_limit_is_accepted() {
        let queue = JobQueue::new(4);
        let table = RouteTable::from_groups(&default_service_groups()).unwrap();
        let router = build_ingress_router(&table, state(queue.clone()));

        let worker = tokio::spawn(serve_one(queue));
        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/posts")
            .body(Body::from(vec![b'x'; 1024]))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            worker.await.unwrap().0.unwrap().topic,
            "PostsService/CreatePost"
        );
    }

    #[tokio::test]
    async fn test_disconnect_counted_once_as_cancelled() {
        let queue = JobQueue::new(1);
        let table = RouteTable::from_groups(&default_service_groups()).unwrap();
        let st = state(queue.clone());
        let metrics = Arc::clone(&st.metrics);
        let router = build_ingress_router(&table, st);

        // Client gives up long before the ingress timeout
        let pending = router.oneshot(request(Method::GET, "/me"));
        assert!(tokio::time::timeout(Duration::from_millis(50), pending)
            .await
            .is_err());

        let job = queue.dequeue().await.unwrap();
        assert!(job.cancel.is_cancelled());
        assert_eq!(metrics.requests_received.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.requests_cancelled.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.requests_unavailable.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_timeout_counted_once_as_unavailable() {
        let queue = JobQueue::new(1);
        let table = RouteTable::from_groups(&default_service_groups()).unwrap();
        let mut st = state(queue);
        st.ingress_timeout = Duration::from_millis(50);
        let metrics = Arc::clone(&st.metrics);
        let router = build_ingress_router(&table, st);

        let response = router.oneshot(request(Method::GET, "/me")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(metrics.requests_unavailable.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.requests_cancelled.load(Ordering::Relaxed), 0);
    }
}
