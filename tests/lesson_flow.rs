//! Lesson sessions, turns and projects over an in-memory database.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ai_tutor::completion::store::{MemoryStore, StoreError};
use ai_tutor::completion::{
    ChatRequest, ChatTransport, CompletionDispatcher, CompletionError, CompletionStore,
    ConversationTurn, Role, UpstreamError,
};
use ai_tutor::lesson::{starter_plan, LessonError, LessonService, LessonStore, TurnRequest};
use ai_tutor::metrics::MetricsRegistry;
use ai_tutor::orchestrator::TurnOrchestrator;
use async_trait::async_trait;

struct FixedTransport {
    reply: Result<&'static str, u16>,
    calls: AtomicUsize,
}

#[async_trait]
impl ChatTransport for FixedTransport {
    async fn chat_completion(&self, _request: &ChatRequest) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.reply {
            Ok(body) => Ok(body.to_string()),
            Err(status) => Err(UpstreamError::Status {
                status,
                body: String::new(),
            }
            .into()),
        }
    }
}

struct WriteFailingStore;

#[async_trait]
impl CompletionStore for WriteFailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Ok(None)
    }

    async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
        Err(StoreError::Backend("read-only replica".into()))
    }

    fn name(&self) -> &'static str {
        "write-failing"
    }
}

const REPLY: &str =
    r#"{"role":"ayya","say":"Two apples and two more make four!","animations":["clap"],"next_task":"count toys"}"#;

fn service_with(
    reply: Result<&'static str, u16>,
    store: Arc<dyn CompletionStore>,
) -> (LessonService, Arc<FixedTransport>) {
    let transport = Arc::new(FixedTransport {
        reply,
        calls: AtomicUsize::new(0),
    });
    let dispatcher = Arc::new(CompletionDispatcher::new(
        transport.clone(),
        store,
        Arc::new(MetricsRegistry::new()),
        "gpt-test",
        Duration::from_secs(600),
    ));
    let orchestrator = Arc::new(TurnOrchestrator::new(dispatcher));
    let lessons = LessonService::new(Arc::new(LessonStore::open_in_memory().unwrap()), orchestrator);
    (lessons, transport)
}

fn service(reply: Result<&'static str, u16>) -> (LessonService, Arc<FixedTransport>) {
    service_with(reply, Arc::new(MemoryStore::default()))
}

fn turn(uid: &str, session_id: Option<i64>, text: &str) -> TurnRequest {
    TurnRequest {
        session_id,
        user_uid: uid.to_string(),
        topic: Some("Math for kids".to_string()),
        messages: vec![ConversationTurn::user(text)],
    }
}

#[tokio::test]
async fn turn_persists_both_sides_of_the_dialog() {
    let (lessons, _) = service(Ok(REPLY));
    lessons.ensure_user("demo123", Some("Test kid")).unwrap();
    let session = lessons.create_session("demo123", Some("Math for kids")).unwrap();

    let reply = lessons
        .turn(turn("demo123", Some(session), "Why is 2+2=4?"))
        .await
        .unwrap();

    assert_eq!(reply.session_id, session);
    assert_eq!(reply.role, Role::Ayya);
    assert_eq!(reply.animations, vec!["clap".to_string()]);
    assert_eq!(reply.next_task.as_deref(), Some("count toys"));

    let transcript = lessons.session_messages(session).unwrap();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].role, "user");
    assert_eq!(transcript[0].content, "Why is 2+2=4?");
    assert_eq!(transcript[1].role, "ayya");
    assert_eq!(transcript[1].content, reply.say);
    let meta = transcript[1].meta.as_ref().unwrap();
    assert_eq!(meta["animations"][0], "clap");
    assert_eq!(meta["next_task"], "count toys");
}

#[tokio::test]
async fn turn_without_session_creates_one() {
    let (lessons, _) = service(Ok(REPLY));
    lessons.ensure_user("kid", None).unwrap();

    let reply = lessons.turn(turn("kid", None, "hello")).await.unwrap();
    assert_eq!(lessons.session_messages(reply.session_id).unwrap().len(), 2);
}

#[tokio::test]
async fn repeated_turn_is_answered_from_cache() {
    let (lessons, transport) = service(Ok(REPLY));
    lessons.ensure_user("kid", None).unwrap();

    let a = lessons.turn(turn("kid", None, "2+2=?")).await.unwrap();
    let b = lessons.turn(turn("kid", None, "2+2=?")).await.unwrap();

    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    assert_ne!(a.session_id, b.session_id);
    assert_eq!(a.say, b.say);
}

#[tokio::test]
async fn unknown_user_and_foreign_session_are_rejected() {
    let (lessons, transport) = service(Ok(REPLY));
    assert!(matches!(
        lessons.turn(turn("ghost", None, "hi")).await,
        Err(LessonError::UserNotFound(uid)) if uid == "ghost"
    ));

    lessons.ensure_user("alice", None).unwrap();
    lessons.ensure_user("bob", None).unwrap();
    let alices = lessons.create_session("alice", None).unwrap();
    assert!(matches!(
        lessons.turn(turn("bob", Some(alices), "hi")).await,
        Err(LessonError::SessionNotFound(id)) if id == alices
    ));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn upstream_failure_keeps_incoming_messages_only() {
    let (lessons, _) = service(Err(502));
    lessons.ensure_user("kid", None).unwrap();
    let session = lessons.create_session("kid", None).unwrap();

    let err = lessons
        .turn(turn("kid", Some(session), "hi"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LessonError::Completion(CompletionError::Upstream(UpstreamError::Status { status: 502, .. }))
    ));

    let transcript = lessons.session_messages(session).unwrap();
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].role, "user");
}

#[tokio::test]
async fn cache_write_failure_still_answers() {
    let (lessons, _) = service_with(Ok(REPLY), Arc::new(WriteFailingStore));
    lessons.ensure_user("kid", None).unwrap();

    let reply = lessons.turn(turn("kid", None, "hi")).await.unwrap();
    assert_eq!(reply.role, Role::Ayya);
    assert_eq!(lessons.session_messages(reply.session_id).unwrap().len(), 2);
}

#[tokio::test]
async fn unlisted_roles_are_stored_as_received() {
    let (lessons, _) = service(Ok(r#"{"role":"Assistant","say":"Four!"}"#));
    lessons.ensure_user("kid", None).unwrap();

    let request: TurnRequest = serde_json::from_str(
        r#"{"user_uid":"kid","messages":[
            {"role":"user","content":"2+2=?"},
            {"role":"assistant","content":"Let's count."},
            {"role":"user","content":"ok"}]}"#,
    )
    .unwrap();
    let reply = lessons.turn(request).await.unwrap();
    assert_eq!(reply.role, Role::Other("Assistant".into()));

    let roles: Vec<String> = lessons
        .session_messages(reply.session_id)
        .unwrap()
        .into_iter()
        .map(|m| m.role)
        .collect();
    assert_eq!(roles, ["user", "assistant", "user", "Assistant"]);
}

#[tokio::test]
async fn project_gets_the_starter_plan() {
    let (lessons, _) = service(Ok(REPLY));
    lessons.ensure_user("kid", None).unwrap();
    let session = lessons.create_session("kid", None).unwrap();

    let project = lessons.create_project(session, "Counting apples").unwrap();
    assert_eq!(project.title, "Counting apples");
    assert_eq!(project.plan, starter_plan());
    assert_eq!(project.plan["steps"].as_array().unwrap().len(), 3);
    assert_eq!(project.plan["data_schema"]["count"], "int");

    let stored = lessons.store().project(project.project_id).unwrap().unwrap();
    assert_eq!(stored.session_id, session);

    assert!(matches!(
        lessons.create_project(session + 1, "x"),
        Err(LessonError::SessionNotFound(_))
    ));
}
