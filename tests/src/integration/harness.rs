//! Loopback backend, gateway configuration and token minting shared by the
//! integration tests.

use api_gateway::domain::EndpointConfig;
use api_gateway::{GatewayConfig, RunningGateway, ServiceGroup};
use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const SECRET: &str = "integration-secret";

/// How long `/slow` takes to answer
pub const SLOW_DELAY: Duration = Duration::from_secs(1);

/// How long `/pause` takes to answer
pub const PAUSE_DELAY: Duration = Duration::from_millis(150);

/// Loopback backend counting every request it receives
pub struct Backend {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl Backend {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn count_hits(State(hits): State<Arc<AtomicUsize>>, request: Request, next: Next) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);
    next.run(request).await
}

fn header(headers: &HeaderMap, name: &str) -> serde_json::Value {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| serde_json::Value::String(v.to_string()))
        .unwrap_or(serde_json::Value::Null)
}

async fn whoami(headers: HeaderMap) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "user": header(&headers, "x-user-id"),
        "request_id": header(&headers, "x-request-id"),
        "has_authorization": headers.contains_key("authorization"),
        "has_cookie": headers.contains_key("cookie"),
    }))
}

async fn item(Path(id): Path<String>, uri: Uri) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "id": id, "query": uri.query() }))
}

pub async fn spawn_backend() -> Backend {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route("/ping", get(|| async { Json(serde_json::json!({ "pong": true })) }))
        .route("/whoami", get(whoami))
        .route("/items/:id", get(item))
        .route("/text", get(|| async { "hello" }))
        .route(
            "/missing",
            get(|| async { (StatusCode::NOT_FOUND, "post not found").into_response() }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(SLOW_DELAY).await;
                Json(serde_json::json!({ "late": true }))
            }),
        )
        .route(
            "/pause",
            get(|| async {
                tokio::time::sleep(PAUSE_DELAY).await;
                Json(serde_json::json!({ "paused": true }))
            }),
        )
        .layer(middleware::from_fn_with_state(Arc::clone(&hits), count_hits));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Backend { addr, hits, handle }
}

/// A port nothing listens on
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn endpoint(name: &str, path: &str, requires_auth: bool) -> EndpointConfig {
    EndpointConfig {
        name: name.to_string(),
        method: "GET".to_string(),
        path: path.to_string(),
        requires_auth,
        rate_class: "open".to_string(),
    }
}

/// Gateway on an ephemeral port routing to `backend`, with generous limits
pub fn gateway_config(backend: SocketAddr) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.http.host = [127, 0, 0, 1].into();
    config.http.port = 0;
    config.admin.enabled = false;
    config.auth.jwt_secret = SECRET.to_string();
    config.proxy.timeout = Duration::from_millis(300);
    config.rate_limit.feature_limits = [("open".to_string(), 1000)].into_iter().collect();

    config.routes.groups = vec![
        ServiceGroup {
            name: "EchoService".to_string(),
            host: "127.0.0.1".to_string(),
            port: backend.port(),
            endpoints: vec![
                endpoint("Ping", "/ping", false),
                endpoint("WhoAmI", "/whoami", true),
                endpoint("GetItem", "/items/{id}", false),
                endpoint("Text", "/text", false),
                endpoint("Missing", "/missing", false),
                endpoint("Slow", "/slow", false),
                endpoint("Pause", "/pause", false),
            ],
        },
        ServiceGroup {
            name: "GhostService".to_string(),
            host: "127.0.0.1".to_string(),
            port: unused_port(),
            endpoints: vec![endpoint("Haunt", "/haunt", false)],
        },
    ];
    config
}

/// Start a gateway and return it with its base URL
pub async fn start(config: GatewayConfig) -> (RunningGateway, String) {
    let service = api_gateway::ApiGatewayService::with_memory_store(config).unwrap();
    let running = service.start().await.unwrap();
    let base = format!("http://{}", running.http_addr());
    (running, base)
}

/// HS256 token carrying `user_id`, expiring `ttl_secs` from now
pub fn mint_token(subject: &str, ttl_secs: i64) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    let claims = serde_json::json!({ "user_id": subject, "exp": now + ttl_secs });
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

/// Split a gateway reply into status, envelope and request id header
pub async fn envelope(response: reqwest::Response) -> (u16, serde_json::Value, Option<String>) {
    let status = response.status().as_u16();
    let request_id = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let body = response.json().await.unwrap();
    (status, body, request_id)
}
