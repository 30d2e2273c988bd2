//! Cached LLM completions.
//! A conversation is hashed into a cache key, looked up in a `CompletionStore`,
//! and only on a miss sent to the upstream `/chat/completions` endpoint.

pub mod dispatcher;
pub mod key;
pub mod openai;
pub mod store;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub use dispatcher::CompletionDispatcher;
pub use key::{derive_cache_key, storage_key};
pub use openai::{ChatRequest, OpenAiClient};
pub use store::{CompletionStore, StoreError};

/// Speaker of a turn. `Ayya` and `Ayana` are the two tutor personas.
/// Any other label (`assistant`, `Ayya`, ...) is kept verbatim in `Other`, so
/// it hashes and persists exactly as received.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    System,
    User,
    Ayya,
    Ayana,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Ayya => "ayya",
            Role::Ayana => "ayana",
            Role::Other(raw) => raw,
        }
    }
}

impl From<String> for Role {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "system" => Role::System,
            "user" => Role::User,
            "ayya" => Role::Ayya,
            "ayana" => Role::Ayana,
            _ => Role::Other(raw),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Role::from(s.to_string()))
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Role::from)
    }
}

/// One role-tagged utterance. Order within a conversation is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// Structured reply decoded from a completion (fresh or cached).
/// Fields the model adds beyond the known ones are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    #[serde(default = "default_reply_role")]
    pub role: Role,
    pub say: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub animations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_task: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_reply_role() -> Role {
    Role::System
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl CompletionResult {
    /// Decode the JSON object carried in a completion's message content.
    pub fn from_json(raw: &str) -> Result<Self, CompletionError> {
        serde_json::from_str(raw)
            .map_err(|e| CompletionError::MalformedCompletionPayload(format!("reply object: {e}")))
    }
}

/// Failure reaching the completion endpoint.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Stage of dispatch that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CacheWrite,
    Upstream,
    Decode,
}

#[derive(Debug, Error)]
pub enum CompletionError {
    /// The completion succeeded but could not be cached. The decoded reply is
    /// carried along so callers can still use it.
    #[error("cache unavailable: {source}")]
    CacheUnavailable {
        source: StoreError,
        result: Box<CompletionResult>,
    },
    #[error("upstream request failed: {0}")]
    Upstream(#[from] UpstreamError),
    #[error("malformed completion payload: {0}")]
    MalformedCompletionPayload(String),
}

impl CompletionError {
    pub fn stage(&self) -> Stage {
        match self {
            CompletionError::CacheUnavailable { .. } => Stage::CacheWrite,
            CompletionError::Upstream(_) => Stage::Upstream,
            CompletionError::MalformedCompletionPayload(_) => Stage::Decode,
        }
    }
}

/// Sends one chat completion request and returns the first choice's content.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn chat_completion(&self, request: &ChatRequest) -> Result<String, CompletionError>;
}
