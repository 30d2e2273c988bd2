//! ai-tutor: backend core for a tutoring app.
//! Cached LLM completions, persona orchestration, lesson sessions and projects.

pub mod auth;
pub mod completion;
pub mod config;
pub mod lesson;
pub mod metrics;
pub mod orchestrator;

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use auth::{AuthError, TokenAuthority};
use completion::store::{MemoryStore, RedisStore, SqliteStore};
use completion::{CompletionDispatcher, CompletionError, CompletionStore, OpenAiClient, StoreError};
use config::{CacheBackend, Settings};
use lesson::{LessonError, LessonService, LessonStore};
use metrics::MetricsRegistry;
use orchestrator::TurnOrchestrator;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("completion store: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error(transparent)]
    Lesson(#[from] LessonError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Everything a request handler needs, wired from settings.
pub struct AppContext {
    pub settings: Settings,
    pub metrics: Arc<MetricsRegistry>,
    pub dispatcher: Arc<CompletionDispatcher>,
    pub orchestrator: Arc<TurnOrchestrator>,
    pub lessons: Arc<LessonService>,
    pub auth: Arc<TokenAuthority>,
}

impl AppContext {
    /// Build the context. With the SQLite cache backend this spawns the purge
    /// loop, so it must run inside a Tokio runtime.
    pub fn build(settings: Settings) -> Result<Self, AppError> {
        let metrics = Arc::new(MetricsRegistry::new());

        let store: Arc<dyn CompletionStore> = match settings.cache_backend {
            CacheBackend::Redis => Arc::new(RedisStore::new(&settings.redis_url())?),
            CacheBackend::Sqlite => {
                let store = Arc::new(SqliteStore::open(&settings.cache_db_path)?);
                SqliteStore::spawn_purge_loop(Arc::clone(&store), Duration::from_secs(3600));
                store
            }
            CacheBackend::Memory => Arc::new(MemoryStore::new(
                NonZeroUsize::new(512).unwrap_or(NonZeroUsize::MIN),
            )),
        };
        info!(backend = store.name(), ttl_secs = settings.cache_ttl.as_secs(), "completion store ready");

        let client = OpenAiClient::new(
            settings.openai_api_key.clone(),
            settings.openai_base_url.clone(),
            settings.openai_timeout,
        )?;

        let dispatcher = Arc::new(CompletionDispatcher::new(
            Arc::new(client),
            store,
            Arc::clone(&metrics),
            settings.openai_model.clone(),
            settings.cache_ttl,
        ));
        let orchestrator = Arc::new(TurnOrchestrator::new(Arc::clone(&dispatcher)));

        let lesson_store = Arc::new(LessonStore::open(&settings.db_path)?);
        let lessons = Arc::new(LessonService::new(lesson_store, Arc::clone(&orchestrator)));

        let auth = Arc::new(TokenAuthority::new(
            &settings.jwt_secret,
            &settings.jwt_alg,
            settings.app_debug,
        )?);

        info!(model = %settings.openai_model, debug = settings.app_debug, "ai-tutor context built");

        Ok(Self {
            settings,
            metrics,
            dispatcher,
            orchestrator,
            lessons,
            auth,
        })
    }
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter; `LOG_FORMAT=json` switches to one JSON object per line.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ai_tutor=debug,info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}
