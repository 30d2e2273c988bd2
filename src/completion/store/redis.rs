//! Redis-backed completion store (`GET` / `SETEX`).

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use super::{CompletionStore, StoreError};

#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    /// Create a store for `redis://host:port/db`. Connects lazily.
    pub fn new(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Backend(format!("invalid URL: {e}")))?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Backend(format!("connection failed: {e}")))
    }
}

#[async_trait]
impl CompletionStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| StoreError::Backend(format!("GET failed: {e}")))?;
        debug!(key, hit = value.is_some(), "redis GET");
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        // SETEX rejects a zero TTL
        let ttl_secs = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(key, value, ttl_secs)
            .await
            .map_err(|e| StoreError::Backend(format!("SETEX failed: {e}")))?;
        debug!(key, ttl_secs, "redis SETEX");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_url() {
        assert!(matches!(
            RedisStore::new("not a url"),
            Err(StoreError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_server_is_backend_error() {
        // Port 1 is never a redis server.
        let store = RedisStore::new("redis://127.0.0.1:1/0").unwrap();
        assert!(matches!(store.get("llm:x").await, Err(StoreError::Backend(_))));
    }
}
