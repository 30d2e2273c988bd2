//! Lessons: chat sessions around the turn orchestrator, plus learning projects.
//!
//! A turn stores the child's incoming messages before asking the tutors, so
//! the transcript keeps them even if the completion fails.

pub mod store;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::completion::{CompletionError, CompletionResult, ConversationTurn, Role};
use crate::orchestrator::TurnOrchestrator;

pub use store::{LessonStore, NewMessage, StoredMessage, StoredProject};

#[derive(Debug, Error)]
pub enum LessonError {
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("session not found: {0}")]
    SessionNotFound(i64),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("stored JSON is invalid: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Completion(#[from] CompletionError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct TurnRequest {
    #[serde(default)]
    pub session_id: Option<i64>,
    pub user_uid: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub messages: Vec<ConversationTurn>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnReply {
    pub session_id: i64,
    pub role: Role,
    pub say: String,
    pub animations: Vec<String>,
    pub next_task: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectReply {
    pub project_id: i64,
    pub title: String,
    pub plan: serde_json::Value,
}

/// Plan every new project starts from.
pub fn starter_plan() -> serde_json::Value {
    serde_json::json!({
        "steps": [
            "Collect 10 observations (count apples or toys)",
            "Make a table: what you counted and how many",
            "Build a 3-slide mini presentation for your parents"
        ],
        "data_schema": {"item": "string", "count": "int"}
    })
}

pub struct LessonService {
    store: Arc<LessonStore>,
    orchestrator: Arc<TurnOrchestrator>,
}

impl LessonService {
    pub fn new(store: Arc<LessonStore>, orchestrator: Arc<TurnOrchestrator>) -> Self {
        Self {
            store,
            orchestrator,
        }
    }

    pub fn store(&self) -> &Arc<LessonStore> {
        &self.store
    }

    pub fn ensure_user(&self, uid: &str, display_name: Option<&str>) -> Result<i64, LessonError> {
        self.store.ensure_user(uid, display_name)
    }

    pub fn create_session(&self, user_uid: &str, topic: Option<&str>) -> Result<i64, LessonError> {
        let user_id = self.require_user(user_uid)?;
        let session_id = self.store.create_session(user_id, topic)?;
        info!(session_id, user_uid, "lesson session created");
        Ok(session_id)
    }

    /// Run one dialog turn and persist both sides of it.
    pub async fn turn(&self, request: TurnRequest) -> Result<TurnReply, LessonError> {
        let user_id = self.require_user(&request.user_uid)?;

        let session_id = match request.session_id {
            Some(id) => {
                if self.store.session_owner(id)? != Some(user_id) {
                    return Err(LessonError::SessionNotFound(id));
                }
                id
            }
            None => self.store.create_session(user_id, request.topic.as_deref())?,
        };

        let incoming: Vec<NewMessage> = request
            .messages
            .iter()
            .map(|m| NewMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
                meta: None,
            })
            .collect();
        self.store.append_messages(session_id, &incoming)?;

        let reply = match self.orchestrator.orchestrate(&request.messages).await {
            Ok(reply) => reply,
            Err(CompletionError::CacheUnavailable { source, result }) => {
                warn!(session_id, error = %source, "reply not cached, continuing");
                *result
            }
            Err(e) => return Err(e.into()),
        };

        self.store
            .append_messages(session_id, &[reply_message(&reply)])?;

        Ok(TurnReply {
            session_id,
            role: reply.role,
            say: reply.say,
            animations: reply.animations,
            next_task: reply.next_task,
        })
    }

    pub fn create_project(&self, session_id: i64, title: &str) -> Result<ProjectReply, LessonError> {
        if self.store.session_owner(session_id)?.is_none() {
            return Err(LessonError::SessionNotFound(session_id));
        }
        let plan = starter_plan();
        let project_id = self.store.create_project(session_id, title, &plan)?;
        info!(project_id, session_id, "project created");
        Ok(ProjectReply {
            project_id,
            title: title.to_string(),
            plan,
        })
    }

    pub fn session_messages(&self, session_id: i64) -> Result<Vec<StoredMessage>, LessonError> {
        self.store.session_messages(session_id)
    }

    fn require_user(&self, uid: &str) -> Result<i64, LessonError> {
        self.store
            .find_user_id(uid)?
            .ok_or_else(|| LessonError::UserNotFound(uid.to_string()))
    }
}

fn reply_message(reply: &CompletionResult) -> NewMessage {
    NewMessage {
        role: reply.role.as_str().to_string(),
        content: reply.say.clone(),
        meta: Some(serde_json::json!({
            "animations": reply.animations,
            "next_task": reply.next_task,
        })),
    }
}
