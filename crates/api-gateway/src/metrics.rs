//! Gateway metrics and the inbound request rate monitor.
//!
//! Exposed on the admin listener as JSON and Prometheus text.

use crate::domain::error::ErrorCode;
use crate::ratelimit::AdmissionTier;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// API Gateway metrics
#[derive(Default)]
pub struct GatewayMetrics {
    // Ingress
    pub requests_received: AtomicU64,
    pub requests_cancelled: AtomicU64,
    pub requests_unavailable: AtomicU64,
    pub oversize_bodies: AtomicU64,

    // Admission
    pub admitted: AtomicU64,
    pub rejected_global: AtomicU64,
    pub rejected_ip: AtomicU64,
    pub rejected_feature: AtomicU64,
    pub store_failures: AtomicU64,

    // Auth and routing
    pub unauthenticated: AtomicU64,
    pub no_route: AtomicU64,

    // Proxy
    pub proxied: AtomicU64,
    pub upstream_errors: AtomicU64,
    pub upstream_timeouts: AtomicU64,
    pub upstream_unreachable: AtomicU64,
    pub build_failures: AtomicU64,

    // Latency tracking (simplified - in production use histograms)
    pub total_latency_ms: AtomicU64,
    pub completed_jobs: AtomicU64,

    // Requests since the last rate sample
    window_requests: AtomicU64,
    // Last sampled inbound rate, requests per second
    last_rate: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an inbound request at ingress
    pub fn record_received(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
        self.window_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Caller went away before a result was delivered
    pub fn record_cancelled(&self) {
        self.requests_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Queue closed, ingress timeout elapsed or job dropped without a reply
    pub fn record_unavailable(&self) {
        self.requests_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    /// Body refused at ingress before a job was built
    pub fn record_oversize(&self) {
        self.oversize_bodies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record rate limit rejection
    pub fn record_rejection(&self, tier: AdmissionTier) {
        let counter = match tier {
            AdmissionTier::Global => &self.rejected_global,
            AdmissionTier::Ip => &self.rejected_ip,
            AdmissionTier::Feature => &self.rejected_feature,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Bucket store call failed and the request was let through
    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the terminal outcome of a job whose result reached the caller
    pub fn record_completion(&self, code: Option<ErrorCode>, latency_ms: u64) {
        let counter = match code {
            None => &self.proxied,
            Some(ErrorCode::Unauthenticated) => &self.unauthenticated,
            Some(ErrorCode::NoRoute) => &self.no_route,
            Some(ErrorCode::UpstreamError) => &self.upstream_errors,
            Some(ErrorCode::GatewayTimeout) => &self.upstream_timeouts,
            Some(ErrorCode::BadGateway) => &self.upstream_unreachable,
            Some(ErrorCode::BuildRequestFailed) => &self.build_failures,
            Some(ErrorCode::Unavailable) => &self.requests_unavailable,
            Some(ErrorCode::PayloadTooLarge) => &self.oversize_bodies,
            // Counted by record_rejection
            Some(
                ErrorCode::RateLimitMaxRequest
                | ErrorCode::RateLimitIp
                | ErrorCode::RateLimitFeature,
            ) => {
                self.record_latency(latency_ms);
                return;
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency_ms);
    }

    fn record_latency(&self, latency_ms: u64) {
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.completed_jobs.fetch_add(1, Ordering::Relaxed);
    }

    /// Get average latency in ms
    pub fn average_latency_ms(&self) -> f64 {
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        let count = self.completed_jobs.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    /// Last sampled inbound rate
    pub fn requests_per_second(&self) -> u64 {
        self.last_rate.load(Ordering::Relaxed)
    }

    /// Take the requests counted since the previous sample and publish the rate
    fn sample_rate(&self, period: Duration) -> u64 {
        let count = self.window_requests.swap(0, Ordering::Relaxed);
        let millis = period.as_millis().max(1) as u64;
        let rate = count.saturating_mul(1000) / millis;
        self.last_rate.store(rate, Ordering::Relaxed);
        rate
    }

    /// Export metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let counters: [(&str, &str, &AtomicU64); 17] = [
            ("requests_received_total", "Inbound requests", &self.requests_received),
            ("requests_cancelled_total", "Callers gone before a reply", &self.requests_cancelled),
            ("requests_unavailable_total", "Requests refused by a closed queue or ingress timeout", &self.requests_unavailable),
            ("oversize_bodies_total", "Requests refused for body size", &self.oversize_bodies),
            ("admitted_total", "Jobs admitted by all limiter tiers", &self.admitted),
            ("rate_limit_global_rejected_total", "Rejected by the global limiter", &self.rejected_global),
            ("rate_limit_ip_rejected_total", "Rejected by the per-IP limiter", &self.rejected_ip),
            ("rate_limit_feature_rejected_total", "Rejected by the per-feature limiter", &self.rejected_feature),
            ("rate_limit_store_failures_total", "Bucket store failures (failed open)", &self.store_failures),
            ("unauthenticated_total", "Rejected credentials", &self.unauthenticated),
            ("no_route_total", "Jobs without a route", &self.no_route),
            ("proxied_total", "Successful backend calls", &self.proxied),
            ("upstream_errors_total", "Backend replies with status >= 400", &self.upstream_errors),
            ("upstream_timeouts_total", "Backend calls that timed out", &self.upstream_timeouts),
            ("upstream_unreachable_total", "Backend calls that failed to connect", &self.upstream_unreachable),
            ("build_failures_total", "Outbound requests that could not be built", &self.build_failures),
            ("completed_jobs_total", "Jobs whose result reached the caller", &self.completed_jobs),
        ];

        let mut output = String::new();
        for (name, help, value) in counters {
            output.push_str(&format!(
                "# HELP api_gateway_{name} {help}\n\
                 # TYPE api_gateway_{name} counter\n\
                 api_gateway_{name} {}\n",
                value.load(Ordering::Relaxed)
            ));
        }

        output.push_str(&format!(
            "# HELP api_gateway_requests_per_second Last sampled inbound rate\n\
             # TYPE api_gateway_requests_per_second gauge\n\
             api_gateway_requests_per_second {}\n",
            self.requests_per_second()
        ));

        output.push_str(&format!(
            "# HELP api_gateway_average_latency_ms Average job latency\n\
             # TYPE api_gateway_average_latency_ms gauge\n\
             api_gateway_average_latency_ms {:.2}\n",
            self.average_latency_ms()
        ));

        output
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        serde_json::json!({
            "requests": {
                "received": load(&self.requests_received),
                "cancelled": load(&self.requests_cancelled),
                "unavailable": load(&self.requests_unavailable),
                "oversize": load(&self.oversize_bodies),
                "per_second": self.requests_per_second(),
            },
            "rate_limiting": {
                "admitted": load(&self.admitted),
                "rejected_global": load(&self.rejected_global),
                "rejected_ip": load(&self.rejected_ip),
                "rejected_feature": load(&self.rejected_feature),
                "store_failures": load(&self.store_failures),
            },
            "pipeline": {
                "unauthenticated": load(&self.unauthenticated),
                "no_route": load(&self.no_route),
                "proxied": load(&self.proxied),
                "upstream_errors": load(&self.upstream_errors),
                "timeouts": load(&self.upstream_timeouts),
                "unreachable": load(&self.upstream_unreachable),
                "build_failures": load(&self.build_failures),
            },
            "latency": {
                "average_ms": self.average_latency_ms(),
                "completed": load(&self.completed_jobs),
            }
        })
    }
}

/// Periodically samples and resets the inbound request counter.
pub struct RequestRateMonitor {
    metrics: Arc<GatewayMetrics>,
    period: Duration,
}

impl RequestRateMonitor {
    pub fn new(metrics: Arc<GatewayMetrics>) -> Self {
        Self::with_period(metrics, Duration::from_secs(1))
    }

    pub fn with_period(metrics: Arc<GatewayMetrics>, period: Duration) -> Self {
        Self { metrics, period }
    }

    /// Run until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Request rate monitor stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let rate = self.metrics.sample_rate(self.period);
                    if rate > 0 {
                        debug!(requests_per_second = rate, "Inbound request rate");
                    }
                }
            }
        }
    }
}
