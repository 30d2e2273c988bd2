//! Key-value stores for cached completions.
//! Values are the raw JSON text of a completion; namespacing (`llm:`) is the
//! caller's job. Stores only need atomic single-key GET and SETEX.

pub mod memory;
pub mod redis;
pub mod sqlite;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;
pub use self::sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache backend: {0}")]
    Backend(String),
}

#[async_trait]
pub trait CompletionStore: Send + Sync {
    /// Returns `Ok(None)` if the key is absent or its TTL has elapsed.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, expiring after `ttl`.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Backend name, for logs.
    fn name(&self) -> &'static str;
}
