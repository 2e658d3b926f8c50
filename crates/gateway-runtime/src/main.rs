//! # API Gateway Runtime
//!
//! Entry point for the gateway in front of the auth, user, posts and follow
//! services.
//!
//! ## Startup Sequence
//!
//! 1. Initialize logging (`RUST_LOG` or `GW_LOG_LEVEL`, `GW_LOG_FORMAT=json`)
//! 2. Load configuration (`GW_CONFIG` JSON file, then `GW_*` overrides)
//! 3. Connect the bucket store (in-memory, or Redis when configured)
//! 4. Start workers, background tasks and listeners
//! 5. Run until Ctrl+C, then drain and stop

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use api_gateway::{ApiGatewayService, BucketStoreConfig, GatewayConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            let level = std::env::var("GW_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
            EnvFilter::try_new(level)
        })
        .context("invalid log filter")?;

    let json = std::env::var("GW_LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}

/// Parse an environment variable, warning on bad values.
fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

/// Load configuration from file and environment.
fn load_config() -> Result<GatewayConfig> {
    let mut config = match std::env::var("GW_CONFIG") {
        Ok(path) => {
            let raw = std::fs::read_to_string(Path::new(&path))
                .with_context(|| format!("reading config file {}", path))?;
            let config: GatewayConfig = serde_json::from_str(&raw)
                .with_context(|| format!("parsing config file {}", path))?;
            info!(path = %path, "Loaded configuration file");
            config
        }
        Err(_) => GatewayConfig::default(),
    };

    if let Some(port) = env_parse("GW_HTTP_PORT") {
        config.http.port = port;
    }
    if let Some(port) = env_parse("GW_ADMIN_PORT") {
        config.admin.port = port;
    }
    if let Ok(secret) = std::env::var("GW_JWT_SECRET") {
        config.auth.jwt_secret = secret;
        info!("Loaded JWT secret from environment");
    }
    if let Ok(url) = std::env::var("GW_REDIS_URL") {
        let key_prefix = match &config.rate_limit.store {
            BucketStoreConfig::Redis { key_prefix, .. } => key_prefix.clone(),
            BucketStoreConfig::Memory => "ratelimit".to_string(),
        };
        config.rate_limit.store = BucketStoreConfig::Redis { url, key_prefix };
    }
    if let Some(limit) = env_parse("GW_GLOBAL_LIMIT") {
        config.rate_limit.global_limit = limit;
    }
    if let Some(limit) = env_parse("GW_IP_LIMIT") {
        config.rate_limit.ip_limit = limit;
    }
    if let Some(capacity) = env_parse("GW_QUEUE_CAPACITY") {
        config.pipeline.queue_capacity = capacity;
    }
    if let Some(workers) = env_parse("GW_WORKERS") {
        config.pipeline.workers = workers;
    }
    if let Some(ms) = env_parse::<u64>("GW_PROXY_TIMEOUT_MS") {
        config.proxy.timeout = Duration::from_millis(ms);
    }

    if config.auth.jwt_secret == GatewayConfig::default().auth.jwt_secret {
        warn!("Using the default JWT secret; set GW_JWT_SECRET in production");
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let config = load_config()?;
    config.validate().context("invalid gateway configuration")?;

    let service = ApiGatewayService::from_config(config)
        .await
        .context("failed to build gateway")?;
    let running = service.start().await.context("failed to start gateway")?;

    info!(addr = %running.http_addr(), "Gateway is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    // Graceful shutdown
    running.shutdown().await;

    Ok(())
}
