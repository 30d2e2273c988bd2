//! Persistent completion store backed by SQLite.
//! Survives restarts without a Redis server; expired rows are filtered on read
//! and purged by a background loop.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use super::{CompletionStore, StoreError};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the cache database at the given path.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)
            .map_err(|e| StoreError::Backend(format!("failed to open SQLite cache: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| StoreError::Backend(format!("PRAGMA failed: {e}")))?;

        let store = Self::with_connection(conn)?;
        info!(path = %db_path.display(), "SQLite completion cache opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Backend(format!("failed to open SQLite cache: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS completion_cache (
                cache_key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                expires_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_completion_expires
                ON completion_cache(expires_at_ms);",
        )
        .map_err(|e| StoreError::Backend(format!("create table failed: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Remove expired entries. Returns how many rows were deleted.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let removed = conn
            .execute(
                "DELETE FROM completion_cache WHERE expires_at_ms <= ?1",
                params![now_unix_ms()],
            )
            .map_err(|e| StoreError::Backend(format!("purge failed: {e}")))?;
        if removed > 0 {
            info!(removed, "completion cache purge");
        }
        Ok(removed)
    }

    /// Purge expired rows every `interval` until the runtime shuts down.
    pub fn spawn_purge_loop(store: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = store.purge_expired() {
                    warn!(error = %e, "completion cache purge failed");
                }
            }
        })
    }
}

#[async_trait]
impl CompletionStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let result: Option<String> = conn
            .query_row(
                "SELECT payload FROM completion_cache
                 WHERE cache_key = ?1 AND expires_at_ms > ?2",
                params![key, now_unix_ms()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Backend(format!("lookup failed: {e}")))?;

        if result.is_some() {
            debug!(key, "SQLite cache hit");
        }
        Ok(result)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at_ms = now_unix_ms().saturating_add(ttl_ms);
        conn.execute(
            "INSERT OR REPLACE INTO completion_cache (cache_key, payload, expires_at_ms)
             VALUES (?1, ?2, ?3)",
            params![key, value, expires_at_ms],
        )
        .map_err(|e| StoreError::Backend(format!("insert failed: {e}")))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

/// Current time as Unix timestamp (milliseconds).
fn now_unix_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
