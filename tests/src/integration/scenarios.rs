//! # Pipeline Outcomes
//!
//! One test per terminal outcome of a job: success, each rejection tier,
//! authentication failure, missing route and each proxy failure.

#[cfg(test)]
mod tests {
    use crate::integration::harness::{
        envelope, gateway_config, mint_token, spawn_backend, start,
    };
    use std::sync::atomic::Ordering;

    // =============================================================================
    // SUCCESS PATH
    // =============================================================================

    #[tokio::test]
    async fn test_success_envelope_carries_backend_data_and_headers() {
        let backend = spawn_backend().await;
        let (running, base) = start(gateway_config(backend.addr)).await;

        let response = reqwest::get(format!("{}/items/7?sort=new", base)).await.unwrap();
        assert_eq!(
            response.headers().get("x-gateway").unwrap(),
            "api-gateway"
        );
        let (status, body, request_id) = envelope(response).await;

        assert_eq!(status, 200);
        assert_eq!(body["status"], "SUCCESS");
        assert_eq!(body["data"]["id"], "7");
        assert_eq!(body["data"]["query"], "sort=new");
        assert!(body["error"].is_null());
        assert_eq!(body["request_id"].as_str(), request_id.as_deref());
        assert_eq!(backend.hits(), 1);

        running.shutdown().await;
    }

    #[tokio::test]
    async fn test_plain_text_body_becomes_string_data() {
        let backend = spawn_backend().await;
        let (running, base) = start(gateway_config(backend.addr)).await;

        let (status, body, _) = envelope(reqwest::get(format!("{}/text", base)).await.unwrap()).await;
        assert_eq!(status, 200);
        assert_eq!(body["data"], "hello");

        running.shutdown().await;
    }

    // =============================================================================
    // AUTHENTICATION
    // =============================================================================

    #[tokio::test]
    async fn test_missing_credential_never_reaches_backend() {
        let backend = spawn_backend().await;
        let (running, base) = start(gateway_config(backend.addr)).await;

        let (status, body, _) =
            envelope(reqwest::get(format!("{}/whoami", base)).await.unwrap()).await;

        assert_eq!(status, 401);
        assert_eq!(body["status"], "ERROR");
        assert_eq!(body["error"]["code"], "UNAUTHENTICATED");
        assert!(body["data"].is_null());
        assert_eq!(backend.hits(), 0);

        running.shutdown().await;
    }

    #[tokio::test]
    async fn test_expired_and_foreign_tokens_rejected() {
        let backend = spawn_backend().await;
        let (running, base) = start(gateway_config(backend.addr)).await;
        let client = reqwest::Client::new();

        let expired = mint_token("alice", -120);
        let forged = format!("{}x", mint_token("alice", 600));
        for token in [expired, forged] {
            let response = client
                .get(format!("{}/whoami", base))
                .bearer_auth(token)
                .send()
                .await
                .unwrap();
            let (status, body, _) = envelope(response).await;
            assert_eq!(status, 401);
            assert_eq!(body["error"]["code"], "UNAUTHENTICATED");
        }
        assert_eq!(backend.hits(), 0);

        running.shutdown().await;
    }

    #[tokio::test]
    async fn test_identity_and_correlation_forwarded_upstream() {
        let backend = spawn_backend().await;
        let (running, base) = start(gateway_config(backend.addr)).await;

        let response = reqwest::Client::new()
            .get(format!("{}/whoami", base))
            .bearer_auth(mint_token("alice", 600))
            .header("cookie", "session=abc")
            .send()
            .await
            .unwrap();
        let (status, body, request_id) = envelope(response).await;

        assert_eq!(status, 200);
        assert_eq!(body["data"]["user"], "alice");
        assert_eq!(body["data"]["has_authorization"], true);
        assert_eq!(body["data"]["has_cookie"], false);
        assert_eq!(body["data"]["request_id"].as_str(), request_id.as_deref());

        running.shutdown().await;
    }

    // =============================================================================
    // ROUTING AND PROXY FAILURES
    // =============================================================================

    #[tokio::test]
    async fn test_unknown_path_is_no_route() {
        let backend = spawn_backend().await;
        let (running, base) = start(gateway_config(backend.addr)).await;
        let metrics = running.metrics();

        let (status, body, _) =
            envelope(reqwest::get(format!("{}/nowhere/at/all", base)).await.unwrap()).await;

        assert_eq!(status, 502);
        assert_eq!(body["error"]["code"], "NO_ROUTE");
        assert_eq!(backend.hits(), 0);

        running.shutdown().await;
        assert_eq!(metrics.no_route.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_encoded_traversal_stays_inside_template() {
        let backend = spawn_backend().await;
        let (running, base) = start(gateway_config(backend.addr)).await;

        let (status, body, _) =
            envelope(reqwest::get(format!("{}/items/..%2F..%2Fping", base)).await.unwrap()).await;

        // Reaches /items/:id with the value intact, never /ping
        assert_eq!(status, 200);
        assert_eq!(body["data"]["id"], "../../ping");
        assert!(body["data"].get("pong").is_none());
        assert_eq!(backend.hits(), 1);

        running.shutdown().await;
    }

    #[tokio::test]
    async fn test_backend_error_status_wrapped_in_ok_envelope() {
        let backend = spawn_backend().await;
        let (running, base) = start(gateway_config(backend.addr)).await;

        let (status, body, _) =
            envelope(reqwest::get(format!("{}/missing", base)).await.unwrap()).await;

        assert_eq!(status, 200);
        assert_eq!(body["status"], "ERROR");
        assert_eq!(body["error"]["code"], "UPSTREAM_ERROR");
        assert_eq!(body["error"]["upstream_status"], 404);
        assert_eq!(body["error"]["message"], "post not found");

        running.shutdown().await;
    }

    #[tokio::test]
    async fn test_slow_backend_times_out_with_single_result() {
        let backend = spawn_backend().await;
        let (running, base) = start(gateway_config(backend.addr)).await;
        let metrics = running.metrics();

        let started = std::time::Instant::now();
        let (status, body, _) = envelope(reqwest::get(format!("{}/slow", base)).await.unwrap()).await;

        assert_eq!(status, 504);
        assert_eq!(body["error"]["code"], "GATEWAY_TIMEOUT");
        assert!(started.elapsed() < crate::integration::harness::SLOW_DELAY);

        running.shutdown().await;
        assert_eq!(metrics.upstream_timeouts.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.completed_jobs.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_bad_gateway() {
        let backend = spawn_backend().await;
        let (running, base) = start(gateway_config(backend.addr)).await;

        let (status, body, _) = envelope(reqwest::get(format!("{}/haunt", base)).await.unwrap()).await;

        assert_eq!(status, 502);
        assert_eq!(body["error"]["code"], "BAD_GATEWAY");

        running.shutdown().await;
    }

    // =============================================================================
    // RATE LIMITING
    // =============================================================================

    #[tokio::test]
    async fn test_global_tier_rejects_over_limit() {
        let backend = spawn_backend().await;
        let mut config = gateway_config(backend.addr);
        config.rate_limit.global_limit = 1;
        let (running, base) = start(config).await;

        let (first, _, _) = envelope(reqwest::get(format!("{}/ping", base)).await.unwrap()).await;
        let (second, body, _) = envelope(reqwest::get(format!("{}/ping", base)).await.unwrap()).await;

        assert_eq!(first, 200);
        assert_eq!(second, 429);
        assert_eq!(body["error"]["code"], "RATE_LIMIT_MAX_REQUEST");
        assert_eq!(backend.hits(), 1);

        running.shutdown().await;
    }

    #[tokio::test]
    async fn test_ip_tier_rejects_over_limit() {
        let backend = spawn_backend().await;
        let mut config = gateway_config(backend.addr);
        config.rate_limit.ip_limit = 2;
        let (running, base) = start(config).await;
        let metrics = running.metrics();

        let mut statuses = Vec::new();
        for _ in 0..3 {
            let (status, body, _) =
                envelope(reqwest::get(format!("{}/ping", base)).await.unwrap()).await;
            statuses.push((status, body["error"]["code"].clone()));
        }

        assert_eq!(statuses[0].0, 200);
        assert_eq!(statuses[1].0, 200);
        assert_eq!(statuses[2].0, 429);
        assert_eq!(statuses[2].1, "RATE_LIMIT_IP");
        assert_eq!(backend.hits(), 2);

        running.shutdown().await;
        assert_eq!(metrics.rejected_ip.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_ip_whitelist_bypasses_ip_tier() {
        let backend = spawn_backend().await;
        let mut config = gateway_config(backend.addr);
        config.rate_limit.ip_limit = 1;
        config.rate_limit.whitelist = vec![[127, 0, 0, 1].into()];
        let (running, base) = start(config).await;

        for _ in 0..3 {
            let (status, _, _) = envelope(reqwest::get(format!("{}/ping", base)).await.unwrap()).await;
            assert_eq!(status, 200);
        }

        running.shutdown().await;
    }

    #[tokio::test]
    async fn test_feature_tier_is_per_identity() {
        let backend = spawn_backend().await;
        let mut config = gateway_config(backend.addr);
        config
            .rate_limit
            .feature_limits
            .insert("open".to_string(), 1);
        let (running, base) = start(config).await;
        let client = reqwest::Client::new();
        let call = |subject: &'static str| {
            client
                .get(format!("{}/whoami", base))
                .bearer_auth(mint_token(subject, 600))
                .send()
        };

        let (alice_first, _, _) = envelope(call("alice").await.unwrap()).await;
        let (alice_second, body, _) = envelope(call("alice").await.unwrap()).await;
        let (bob_first, _, _) = envelope(call("bob").await.unwrap()).await;

        assert_eq!(alice_first, 200);
        assert_eq!(alice_second, 429);
        assert_eq!(body["error"]["code"], "RATE_LIMIT_FEATURE");
        assert_eq!(bob_first, 200);
        assert_eq!(backend.hits(), 2);

        running.shutdown().await;
    }

    #[tokio::test]
    async fn test_disabled_rate_limiting_admits_everything() {
        let backend = spawn_backend().await;
        let mut config = gateway_config(backend.addr);
        config.rate_limit.global_limit = 1;
        config.rate_limit.enabled = false;
        let (running, base) = start(config).await;

        for _ in 0..3 {
            let (status, _, _) = envelope(reqwest::get(format!("{}/ping", base)).await.unwrap()).await;
            assert_eq!(status, 200);
        }

        running.shutdown().await;
    }
}
