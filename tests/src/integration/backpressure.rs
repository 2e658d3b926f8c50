//! # Queue Backpressure
//!
//! A full queue makes callers wait instead of rejecting them. The ingress
//! timeout bounds that wait, and shutdown stops new work.

#[cfg(test)]
mod tests {
    use crate::integration::harness::{envelope, gateway_config, spawn_backend, start, PAUSE_DELAY};
    use std::sync::atomic::Ordering;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_full_queue_blocks_instead_of_rejecting() {
        let backend = spawn_backend().await;
        let mut config = gateway_config(backend.addr);
        config.pipeline.queue_capacity = 1;
        config.pipeline.workers = 1;
        config.proxy.timeout = Duration::from_secs(3);
        config.http.ingress_timeout = Duration::from_secs(10);
        let (running, base) = start(config).await;

        let started = Instant::now();
        let calls: Vec<_> = (0..4)
            .map(|_| tokio::spawn(reqwest::get(format!("{}/pause", base))))
            .collect();

        for call in calls {
            let (status, body, _) = envelope(call.await.unwrap().unwrap()).await;
            assert_eq!(status, 200);
            assert_eq!(body["data"]["paused"], true);
        }

        // One worker serves the calls one after another
        assert!(started.elapsed() >= PAUSE_DELAY * 3);
        assert_eq!(backend.hits(), 4);

        running.shutdown().await;
    }

    #[tokio::test]
    async fn test_ingress_timeout_yields_unavailable() {
        let backend = spawn_backend().await;
        let mut config = gateway_config(backend.addr);
        config.pipeline.queue_capacity = 1;
        config.pipeline.workers = 1;
        config.proxy.timeout = Duration::from_secs(3);
        config.http.ingress_timeout = Duration::from_millis(200);
        let (running, base) = start(config).await;
        let metrics = running.metrics();

        let calls: Vec<_> = (0..3)
            .map(|_| tokio::spawn(reqwest::get(format!("{}/slow", base))))
            .collect();

        for call in calls {
            let (status, body, _) = envelope(call.await.unwrap().unwrap()).await;
            assert_eq!(status, 503);
            assert_eq!(body["error"]["code"], "UNAVAILABLE");
        }

        running.shutdown().await;
        assert_eq!(metrics.requests_unavailable.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.requests_cancelled.load(Ordering::Relaxed), 0);
        // The in-flight result had nobody to reach
        assert_eq!(metrics.completed_jobs.load(Ordering::Relaxed), 0);
        // Only the job the worker had already taken was proxied; the
        // abandoned queued job is skipped
        assert_eq!(backend.hits(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let backend = spawn_backend().await;
        let (running, base) = start(gateway_config(backend.addr)).await;

        let (status, _, _) = envelope(reqwest::get(format!("{}/ping", base)).await.unwrap()).await;
        assert_eq!(status, 200);

        running.shutdown().await;
        assert!(reqwest::get(format!("{}/ping", base)).await.is_err());
    }
}
