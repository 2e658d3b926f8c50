//! Redis-backed bucket store shared by all gateway instances.
//!
//! Each bucket is a hash with fields `capacity`, `tokens`, `refill_rate` and
//! `last_refill` (unix seconds, millisecond precision). Refill and consume run inside a
//! Lua script so concurrent gateways never lose an update.

use super::bucket::{BucketSpec, BucketStore, Decision, StoreError, TokenBucket};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const TAKE_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local state = redis.call('HMGET', key, 'tokens', 'last_refill')
local tokens = tonumber(state[1])
local last_refill = tonumber(state[2])
if tokens == nil or last_refill == nil then
    tokens = capacity
    last_refill = now
end
if tokens > capacity then
    tokens = capacity
end

local elapsed_ms = math.floor((now - last_refill) * 1000 + 0.5)
if elapsed_ms < 0 then
    elapsed_ms = 0
end
local refill = math.floor(elapsed_ms * rate / 1000)
if refill > 0 then
    tokens = math.min(capacity, tokens + refill)
    last_refill = now
end

local allowed = 0
if tokens > 0 then
    tokens = tokens - 1
    allowed = 1
end

redis.call('HSET', key,
    'capacity', capacity,
    'tokens', tokens,
    'refill_rate', rate,
    'last_refill', string.format('%.3f', last_refill))
redis.call('EXPIRE', key, ttl)

return {allowed, tokens}
"#;

/// Token buckets stored in Redis hashes
pub struct RedisBucketStore {
    connection: ConnectionManager,
    script: redis::Script,
    key_prefix: String,
    ttl_secs: u64,
}

impl RedisBucketStore {
    /// Connect and verify the server answers `PING`
    pub async fn connect(url: &str, key_prefix: &str, idle_ttl: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        let mut conn = connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!(prefix = %key_prefix, "Connected to Redis bucket store");

        Ok(Self::with_connection(connection, key_prefix, idle_ttl))
    }

    pub fn with_connection(connection: ConnectionManager, key_prefix: &str, idle_ttl: Duration) -> Self {
        Self {
            connection,
            script: redis::Script::new(TAKE_SCRIPT),
            key_prefix: key_prefix.to_string(),
            ttl_secs: idle_ttl.as_secs().max(1),
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }
}

#[async_trait]
impl BucketStore for RedisBucketStore {
    async fn take(
        &self,
        key: &str,
        spec: BucketSpec,
        now: Duration,
    ) -> Result<Decision, StoreError> {
        let mut conn = self.connection.clone();
        let (allowed, remaining): (i64, i64) = self
            .script
            .key(self.storage_key(key))
            .arg(spec.capacity)
            .arg(spec.refill_rate)
            .arg(format!("{}.{:03}", now.as_secs(), now.subsec_millis()))
            .arg(self.ttl_secs)
            .invoke_async(&mut conn)
            .await?;

        Ok(Decision {
            allowed: allowed == 1,
            remaining: u64::try_from(remaining).unwrap_or(0),
        })
    }

    async fn peek(&self, key: &str) -> Result<Option<TokenBucket>, StoreError> {
        let mut conn = self.connection.clone();
        let storage_key = self.storage_key(key);
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(&storage_key)
            .query_async(&mut conn)
            .await?;

        if fields.is_empty() {
            return Ok(None);
        }
        parse_bucket(&storage_key, &fields).map(Some)
    }
}

fn parse_bucket(key: &str, fields: &HashMap<String, String>) -> Result<TokenBucket, StoreError> {
    let field = |name: &str| -> Result<f64, StoreError> {
        fields
            .get(name)
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v >= 0.0)
            .ok_or_else(|| StoreError::Malformed {
                key: key.to_string(),
                reason: format!("missing or invalid field {}", name),
            })
    };

    Ok(TokenBucket {
        capacity: field("capacity")? as u64,
        tokens: field("tokens")? as u64,
        refill_rate: field("refill_rate")? as u64,
        last_refill: Duration::from_millis((field("last_refill")? * 1000.0).round() as u64),
    })
}
