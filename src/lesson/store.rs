//! SQLite persistence for users, chat sessions, messages and projects.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use super::LessonError;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        uid TEXT NOT NULL UNIQUE,
        display_name TEXT,
        created_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS chat_sessions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        topic TEXT,
        created_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id INTEGER NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        meta TEXT,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, id);
    CREATE TABLE IF NOT EXISTS projects (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id INTEGER NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        plan TEXT NOT NULL,
        data TEXT,
        created_at INTEGER NOT NULL
    );";

/// A message about to be written.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: String,
    pub content: String,
    pub meta: Option<serde_json::Value>,
}

/// A message read back from a session transcript.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMessage {
    pub id: i64,
    pub session_id: i64,
    pub role: String,
    pub content: String,
    pub meta: Option<serde_json::Value>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredProject {
    pub id: i64,
    pub session_id: i64,
    pub title: String,
    pub plan: serde_json::Value,
    pub data: Option<serde_json::Value>,
}

pub struct LessonStore {
    conn: Mutex<Connection>,
}

impl LessonStore {
    /// Open (or create) the lesson database and its tables.
    pub fn open(db_path: &Path) -> Result<Self, LessonError> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self::with_connection(conn)?;
        info!(path = %db_path.display(), "lesson store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, LessonError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, LessonError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Id of the user with `uid`, creating the row if needed.
    pub fn ensure_user(&self, uid: &str, display_name: Option<&str>) -> Result<i64, LessonError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO users (uid, display_name, created_at) VALUES (?1, ?2, ?3)",
            params![uid, display_name, now_unix()],
        )?;
        let id = conn.query_row("SELECT id FROM users WHERE uid = ?1", params![uid], |row| {
            row.get(0)
        })?;
        Ok(id)
    }

    pub fn find_user_id(&self, uid: &str) -> Result<Option<i64>, LessonError> {
        let conn = self.conn.lock();
        let id = conn
            .query_row("SELECT id FROM users WHERE uid = ?1", params![uid], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(id)
    }

    pub fn create_session(&self, user_id: i64, topic: Option<&str>) -> Result<i64, LessonError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO chat_sessions (user_id, topic, created_at) VALUES (?1, ?2, ?3)",
            params![user_id, topic, now_unix()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Owner's user id, or `None` for an unknown session.
    pub fn session_owner(&self, session_id: i64) -> Result<Option<i64>, LessonError> {
        let conn = self.conn.lock();
        let owner = conn
            .query_row(
                "SELECT user_id FROM chat_sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(owner)
    }

    /// Append messages to a session in one transaction, preserving order.
    pub fn append_messages(&self, session_id: i64, messages: &[NewMessage]) -> Result<(), LessonError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO messages (session_id, role, content, meta, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            let now = now_unix();
            for m in messages {
                let meta = m.meta.as_ref().map(serde_json::to_string).transpose()?;
                stmt.execute(params![session_id, m.role, m.content, meta, now])?;
            }
        }
        tx.commit()?;
        debug!(session_id, count = messages.len(), "messages stored");
        Ok(())
    }

    /// Session transcript, oldest first.
    pub fn session_messages(&self, session_id: i64) -> Result<Vec<StoredMessage>, LessonError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, content, meta, created_at
             FROM messages WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, session_id, role, content, meta, created_at) = row?;
            out.push(StoredMessage {
                id,
                session_id,
                role,
                content,
                meta: meta.as_deref().map(serde_json::from_str).transpose()?,
                created_at,
            });
        }
        Ok(out)
    }

    pub fn create_project(
        &self,
        session_id: i64,
        title: &str,
        plan: &serde_json::Value,
    ) -> Result<i64, LessonError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO projects (session_id, title, plan, data, created_at)
             VALUES (?1, ?2, ?3, NULL, ?4)",
            params![session_id, title, serde_json::to_string(plan)?, now_unix()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn project(&self, project_id: i64) -> Result<Option<StoredProject>, LessonError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, session_id, title, plan, data FROM projects WHERE id = ?1",
                params![project_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, session_id, title, plan, data)) = row else {
            return Ok(None);
        };
        Ok(Some(StoredProject {
            id,
            session_id,
            title,
            plan: serde_json::from_str(&plan)?,
            data: data.as_deref().map(serde_json::from_str).transpose()?,
        }))
    }
}

/// Current time as Unix timestamp (seconds).
fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ensure_user_is_idempotent() {
        let store = LessonStore::open_in_memory().unwrap();
        let a = store.ensure_user("demo123", Some("Kid")).unwrap();
        let b = store.ensure_user("demo123", None).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.find_user_id("demo123").unwrap(), Some(a));
        assert_eq!(store.find_user_id("ghost").unwrap(), None);
    }

    #[test]
    fn messages_keep_order_and_meta() {
        let store = LessonStore::open_in_memory().unwrap();
        let user = store.ensure_user("u", None).unwrap();
        let session = store.create_session(user, Some("math")).unwrap();
        store
            .append_messages(
                session,
                &[
                    NewMessage {
                        role: "user".into(),
                        content: "first".into(),
                        meta: None,
                    },
                    NewMessage {
                        role: "ayya".into(),
                        content: "second".into(),
                        meta: Some(json!({"animations": ["clap"], "next_task": null})),
                    },
                ],
            )
            .unwrap();

        let msgs = store.session_messages(session).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].content, "first");
        assert_eq!(msgs[1].role, "ayya");
        assert_eq!(msgs[1].meta.as_ref().unwrap()["animations"][0], "clap");
    }

    #[test]
    fn session_owner_and_unknown_session() {
        let store = LessonStore::open_in_memory().unwrap();
        let user = store.ensure_user("u", None).unwrap();
        let session = store.create_session(user, None).unwrap();
        assert_eq!(store.session_owner(session).unwrap(), Some(user));
        assert_eq!(store.session_owner(session + 100).unwrap(), None);
    }

    #[test]
    fn message_for_unknown_session_violates_foreign_key() {
        let store = LessonStore::open_in_memory().unwrap();
        let err = store
            .append_messages(
                42,
                &[NewMessage {
                    role: "user".into(),
                    content: "x".into(),
                    meta: None,
                }],
            )
            .unwrap_err();
        assert!(matches!(err, LessonError::Storage(_)));
    }

    #[test]
    fn project_round_trip() {
        let store = LessonStore::open_in_memory().unwrap();
        let user = store.ensure_user("u", None).unwrap();
        let session = store.create_session(user, None).unwrap();
        let plan = json!({"steps": ["a"], "data_schema": {"item": "string"}});
        let id = store.create_project(session, "Apples", &plan).unwrap();

        let project = store.project(id).unwrap().unwrap();
        assert_eq!(project.title, "Apples");
        assert_eq!(project.plan, plan);
        assert_eq!(project.data, None);
        assert!(store.project(id + 1).unwrap().is_none());
    }
}
