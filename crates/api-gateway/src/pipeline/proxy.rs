//! Upstream call and response normalization.

use crate::domain::config::ProxyConfig;
use crate::domain::correlation::{RequestId, TraceId};
use crate::domain::envelope::{Envelope, JobResult, X_REQUEST_ID, X_TRACE_ID, X_USER_ID};
use crate::domain::error::{ApiError, GatewayError};
use crate::domain::routes::RouteEntry;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use std::time::Duration;

/// Inbound headers copied to the backend
const FORWARDED_HEADERS: [header::HeaderName; 2] = [header::CONTENT_TYPE, header::ACCEPT];

/// Upstream call failures that become gateway errors
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Unreachable(String),
    #[error("failed to build upstream request: {0}")]
    Build(String),
}

impl ProxyError {
    pub fn into_api_error(self) -> ApiError {
        match self {
            ProxyError::Timeout(timeout) => ApiError::gateway_timeout(timeout.as_millis()),
            ProxyError::Unreachable(details) => ApiError::bad_gateway(details),
            ProxyError::Build(details) => ApiError::build_request_failed(details),
        }
    }
}

/// Everything the proxy needs from an admitted job
#[derive(Debug)]
pub struct UpstreamCall<'a> {
    pub entry: &'a RouteEntry,
    pub method: Method,
    /// Concrete path with query
    pub path_and_query: String,
    pub headers: &'a HeaderMap,
    pub body: Bytes,
    pub request_id: RequestId,
    /// Authenticated subject, if any
    pub identity: Option<&'a str>,
    /// Original credential, forwarded only when authenticated
    pub credential: Option<&'a str>,
}

/// Raw backend reply
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: StatusCode,
    pub body: Bytes,
}

/// HTTP forwarding with a fixed per-call timeout
#[derive(Clone)]
pub struct ProxyStage {
    client: reqwest::Client,
    timeout: Duration,
}

impl ProxyStage {
    pub fn new(config: &ProxyConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Client(e.to_string()))?;
        Ok(Self {
            client,
            timeout: config.timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send the call. The timeout covers connect, send and body read.
    pub async fn forward(&self, call: UpstreamCall<'_>) -> Result<UpstreamReply, ProxyError> {
        let url = call.entry.upstream_url(&call.path_and_query);
        let headers = outbound_headers(&call)?;

        let request = self
            .client
            .request(call.method, url)
            .headers(headers)
            .body(call.body)
            .build()
            .map_err(|e| ProxyError::Build(e.to_string()))?;

        let client = self.client.clone();
        let exchange = async move {
            let response = client.execute(request).await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>(UpstreamReply { status, body })
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Err(_) => Err(ProxyError::Timeout(self.timeout)),
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) if e.is_timeout() => Err(ProxyError::Timeout(self.timeout)),
            Ok(Err(e)) if e.is_builder() => Err(ProxyError::Build(e.to_string())),
            Ok(Err(e)) => Err(ProxyError::Unreachable(e.to_string())),
        }
    }
}

fn outbound_headers(call: &UpstreamCall<'_>) -> Result<HeaderMap, ProxyError> {
    let mut headers = HeaderMap::new();
    for name in FORWARDED_HEADERS {
        for value in call.headers.get_all(&name) {
            headers.append(name.clone(), value.clone());
        }
    }

    let value = |s: &str| {
        HeaderValue::from_str(s).map_err(|e| ProxyError::Build(format!("invalid header value: {}", e)))
    };
    headers.insert(X_REQUEST_ID, value(&call.request_id.to_string())?);
    headers.insert(X_TRACE_ID, value(&TraceId::new().to_string())?);
    if let Some(identity) = call.identity {
        headers.insert(X_USER_ID, value(identity)?);
        if let Some(credential) = call.credential {
            headers.insert(header::AUTHORIZATION, value(credential)?);
        }
    }
    Ok(headers)
}

/// Wrap a backend reply in the envelope. Error statuses stay inside a 200.
pub fn normalize(reply: &UpstreamReply, request_id: RequestId, latency_ms: u64) -> JobResult {
    if reply.status.as_u16() >= 400 {
        let message = String::from_utf8_lossy(&reply.body).into_owned();
        return JobResult::error(
            request_id,
            latency_ms,
            ApiError::upstream(reply.status.as_u16(), message),
        );
    }
    let envelope = Envelope::success(request_id, latency_ms, Envelope::data_from_body(&reply.body));
    JobResult::from_envelope(StatusCode::OK, &envelope)
}
