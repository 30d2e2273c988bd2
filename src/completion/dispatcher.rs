//! Cache-first completion dispatch.
//!
//! `complete` does one store read, and only on a miss one upstream call and
//! one store write, strictly in that order. Read-then-write is not atomic:
//! two concurrent misses for the same conversation both reach upstream and
//! the last write wins. Results for identical input are interchangeable, so
//! that race is accepted.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::key::{derive_cache_key, storage_key};
use super::{
    ChatRequest, ChatTransport, CompletionError, CompletionResult, CompletionStore,
    ConversationTurn,
};
use crate::metrics::{metric_names, MetricsRegistry};

pub struct CompletionDispatcher {
    transport: Arc<dyn ChatTransport>,
    store: Arc<dyn CompletionStore>,
    metrics: Arc<MetricsRegistry>,
    model: String,
    ttl: Duration,
}

impl CompletionDispatcher {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        store: Arc<dyn CompletionStore>,
        metrics: Arc<MetricsRegistry>,
        model: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            transport,
            store,
            metrics,
            model: model.into(),
            ttl,
        }
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Return the reply for `turns`, from cache when possible.
    pub async fn complete(
        &self,
        turns: &[ConversationTurn],
    ) -> Result<CompletionResult, CompletionError> {
        let _total = self.metrics.time(metric_names::T_COMPLETE);
        let digest = derive_cache_key(turns);
        let key = storage_key(&digest);

        if let Some(hit) = self.lookup(&key).await {
            self.metrics.increment(metric_names::CACHE_HIT);
            debug!(key = %key, "completion cache hit");
            return Ok(hit);
        }
        self.metrics.increment(metric_names::CACHE_MISS);

        let request = ChatRequest::json_object(self.model.clone(), turns.to_vec());
        let upstream = self.metrics.time(metric_names::T_UPSTREAM);
        let outcome = self.transport.chat_completion(&request).await;
        let upstream_elapsed = upstream.elapsed();
        drop(upstream);

        let raw = match outcome {
            Ok(raw) => raw,
            Err(e) => {
                self.metrics.increment(metric_names::UPSTREAM_ERROR);
                warn!(
                    key = %key,
                    upstream_ms = upstream_elapsed.as_millis() as u64,
                    error = %e,
                    "completion dispatch failed"
                );
                return Err(e);
            }
        };

        // Nothing is cached unless it decodes.
        let result = CompletionResult::from_json(&raw)?;

        if let Err(source) = self.store.set_ex(&key, &raw, self.ttl).await {
            self.metrics.increment(metric_names::CACHE_WRITE_ERROR);
            warn!(
                key = %key,
                store = self.store.name(),
                error = %source,
                "completion cache write failed"
            );
            return Err(CompletionError::CacheUnavailable {
                source,
                result: Box::new(result),
            });
        }

        info!(
            key = %key,
            turns = turns.len(),
            upstream_ms = upstream_elapsed.as_millis() as u64,
            ttl_secs = self.ttl.as_secs(),
            "completion fetched and cached"
        );
        Ok(result)
    }

    /// Cache read. Store failures and undecodable entries count as misses.
    async fn lookup(&self, key: &str) -> Option<CompletionResult> {
        let timer = self.metrics.time(metric_names::T_CACHE_LOOKUP);
        let cached = self.store.get(key).await;
        drop(timer);

        let raw = match cached {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                self.metrics.increment(metric_names::CACHE_READ_ERROR);
                warn!(key, store = self.store.name(), error = %e, "cache read failed, treating as miss");
                return None;
            }
        };

        match CompletionResult::from_json(&raw) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(key, error = %e, "cached completion undecodable, treating as miss");
                None
            }
        }
    }
}
