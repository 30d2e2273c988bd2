//! Runtime settings read from the process environment.
//! Every field has an env var of the same name in upper case; only the
//! upstream credentials are mandatory.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Which backend holds cached completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    Sqlite,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub openai_timeout: Duration,

    pub cache_backend: CacheBackend,
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_db: i64,
    pub cache_ttl: Duration,
    pub cache_db_path: PathBuf,

    pub db_path: PathBuf,

    /// Allows raw bearer tokens to stand in for a uid.
    pub app_debug: bool,
    pub jwt_secret: String,
    pub jwt_alg: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| lookup(name).ok_or(ConfigError::Missing(name));
        let or_default = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let cache_backend = match lookup("CACHE_BACKEND").as_deref() {
            None | Some("redis") => CacheBackend::Redis,
            Some("sqlite") => CacheBackend::Sqlite,
            Some("memory") => CacheBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "CACHE_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            openai_api_key: required("OPENAI_API_KEY")?,
            openai_base_url: required("OPENAI_BASE_URL")?,
            openai_model: required("OPENAI_MODEL")?,
            openai_timeout: Duration::from_secs(parse_or(&lookup, "OPENAI_TIMEOUT", 60)?),

            cache_backend,
            redis_host: or_default("REDIS_HOST", "localhost"),
            redis_port: parse_or(&lookup, "REDIS_PORT", 6379)?,
            redis_db: parse_or(&lookup, "REDIS_DB", 0)?,
            cache_ttl: Duration::from_secs(parse_or(&lookup, "REDIS_TTL_SECONDS", 600)?),
            cache_db_path: PathBuf::from(or_default("CACHE_DB_PATH", "completion_cache.db")),

            db_path: PathBuf::from(or_default("DB_PATH", "aitutor.db")),

            app_debug: parse_flag(&lookup, "APP_DEBUG")?,
            jwt_secret: or_default("JWT_SECRET", "dev-secret-change-me"),
            jwt_alg: or_default("JWT_ALG", "HS256"),
        })
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/{}", self.redis_host, self.redis_port, self.redis_db)
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}

fn parse_flag<F>(lookup: &F, name: &'static str) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name).as_deref().map(str::trim) {
        None | Some("") => Ok(false),
        Some(v) if v.eq_ignore_ascii_case("true") || v == "1" || v.eq_ignore_ascii_case("yes") => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("false") || v == "0" || v.eq_ignore_ascii_case("no") => Ok(false),
        Some(v) => Err(ConfigError::Invalid {
            name,
            value: v.to_string(),
        }),
    }
}
