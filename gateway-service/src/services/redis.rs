//! Redis-backed counter store.
//!
//! Counters are stored as JSON under their scope key with a TTL, so stale
//! windows fall out on their own without a sweep.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};

use crate::config::RedisConfig;
use crate::models::RateLimitCounter;
use crate::services::store::CounterStore;

#[derive(Clone)]
pub struct RedisCounterStore {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisCounterStore {
    pub async fn new(config: &RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!(url = %config.url, "Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        // ConnectionManager reconnects on its own after transient failures
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }

    fn storage_key(scope_key: &str) -> String {
        format!("ratelimit:{}", scope_key)
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn fetch(&self, scope_key: &str) -> Result<Option<RateLimitCounter>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(Self::storage_key(scope_key))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read counter: {}", e))?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        scope_key: &str,
        counter: &RateLimitCounter,
        ttl_seconds: i64,
    ) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let json = serde_json::to_string(counter)?;
        redis::cmd("SET")
            .arg(Self::storage_key(scope_key))
            .arg(json)
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write counter: {}", e))
    }

    async fn sweep(&self, _max_window_seconds: i64) -> Result<u64, anyhow::Error> {
        // TTLs already bound counter lifetime
        Ok(0)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}
