//! Normalized response envelope and the per-job result written to the caller.

use crate::domain::correlation::RequestId;
use crate::domain::error::ApiError;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Header identifying the gateway on every reply
pub const X_GATEWAY: HeaderName = HeaderName::from_static("x-gateway");
/// Correlation id header, both directions
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
/// Trace id header, upstream only
pub const X_TRACE_ID: HeaderName = HeaderName::from_static("x-trace-id");
/// Authenticated subject forwarded upstream
pub const X_USER_ID: HeaderName = HeaderName::from_static("x-user-id");

const GATEWAY_NAME: &str = "api-gateway";

/// Envelope status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeStatus {
    Success,
    Error,
}

/// Uniform JSON body returned for every job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub request_id: RequestId,
    pub status: EnvelopeStatus,
    pub latency_ms: u64,
    /// Backend payload; `null` on error or empty body
    pub data: serde_json::Value,
    pub error: Option<ApiError>,
}

impl Envelope {
    pub fn success(request_id: RequestId, latency_ms: u64, data: serde_json::Value) -> Self {
        Self {
            request_id,
            status: EnvelopeStatus::Success,
            latency_ms,
            data,
            error: None,
        }
    }

    pub fn failure(request_id: RequestId, latency_ms: u64, error: ApiError) -> Self {
        Self {
            request_id,
            status: EnvelopeStatus::Error,
            latency_ms,
            data: serde_json::Value::Null,
            error: Some(error),
        }
    }

    /// Interpret a backend body as envelope data.
    ///
    /// JSON bodies are embedded as-is, anything else becomes a JSON string.
    pub fn data_from_body(body: &[u8]) -> serde_json::Value {
        if body.iter().all(u8::is_ascii_whitespace) {
            return serde_json::Value::Null;
        }
        serde_json::from_slice(body).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(body).into_owned())
        })
    }
}

/// Result delivered on a job's reply channel.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl JobResult {
    /// Serialize an envelope with the standard gateway headers
    pub fn from_envelope(status: StatusCode, envelope: &Envelope) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(X_GATEWAY, HeaderValue::from_static(GATEWAY_NAME));
        if let Ok(value) = HeaderValue::from_str(&envelope.request_id.to_string()) {
            headers.insert(X_REQUEST_ID, value);
        }

        match serde_json::to_vec(envelope) {
            Ok(body) => Self {
                status,
                headers,
                body: Bytes::from(body),
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode response envelope");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    headers,
                    body: Bytes::from_static(
                        br#"{"status":"ERROR","error":{"code":"BUILD_REQUEST_FAILED","message":"envelope encoding failed"}}"#,
                    ),
                }
            }
        }
    }

    /// Error reply whose outer status follows the error code
    pub fn error(request_id: RequestId, latency_ms: u64, error: ApiError) -> Self {
        let status = error.http_status();
        Self::from_envelope(status, &Envelope::failure(request_id, latency_ms, error))
    }

    /// Decode the body back into an envelope
    pub fn envelope(&self) -> Result<Envelope, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

impl IntoResponse for JobResult {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
