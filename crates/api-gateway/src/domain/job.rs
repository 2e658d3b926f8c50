//! Inbound request jobs carried from ingress handlers to pipeline workers.

use crate::domain::envelope::JobResult;
use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use std::net::IpAddr;
use std::time::Instant;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Route selected by the ingress router for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteKey {
    /// `service/endpoint`
    pub topic: String,
    /// Path parameters captured from the template, in template order
    pub params: Vec<(String, String)>,
}

/// One inbound HTTP request, normalized.
///
/// Owned by the ingress handler until enqueued, then by exactly one worker.
/// The reply sender is consumed on first use, so a job can never produce
/// more than one [`JobResult`].
#[derive(Debug)]
pub struct Job {
    pub method: Method,
    /// Inbound path, without query
    pub path: String,
    /// Raw query string, forwarded unchanged
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_ip: IpAddr,
    /// `None` when no ingress route matched
    pub route: Option<RouteKey>,
    /// Raw `Authorization` header value
    pub credential: Option<String>,
    pub reply: oneshot::Sender<JobResult>,
    /// Fires when the caller goes away
    pub cancel: CancellationToken,
    pub received_at: Instant,
}

impl Job {
    /// Build a job and the receiver its handler waits on.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        method: Method,
        path: String,
        query: Option<String>,
        headers: HeaderMap,
        body: Bytes,
        client_ip: IpAddr,
        route: Option<RouteKey>,
        cancel: CancellationToken,
    ) -> (Self, oneshot::Receiver<JobResult>) {
        let (reply, rx) = oneshot::channel();
        let credential = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let job = Self {
            method,
            path,
            query,
            headers,
            body,
            client_ip,
            route,
            credential,
            reply,
            cancel,
            received_at: Instant::now(),
        };
        (job, rx)
    }

    /// Topic for logging; unmatched jobs report their method and path
    pub fn topic_label(&self) -> String {
        match &self.route {
            Some(route) => route.topic.clone(),
            None => format!("{} {}", self.method, self.path),
        }
    }

    /// Path plus query as received
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) if !q.is_empty() => format!("{}?{}", self.path, q),
            _ => self.path.clone(),
        }
    }

    /// Deliver the result, consuming the job.
    ///
    /// Returns `false` when the caller has already stopped waiting.
    pub fn respond(self, result: JobResult) -> bool {
        self.reply.send(result).is_ok()
    }
}
