//! Configuration types.
//!
//! Everything is read from the environment once at startup and then shared
//! read-only with the components that need it.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::retry::{CHAT_BACKOFF, DEFAULT_MAX_ATTEMPTS, INGEST_BACKOFF};
use crate::llm::{LlmBackend, LlmConfig, RetryPolicy};

/// Default bucket holding uploaded lectures.
pub const DEFAULT_BUCKET: &str = "Lectures";

/// Characters of transcript sent as chat context to remote models.
pub const DEFAULT_CHAT_CONTEXT_CHARS: usize = 20_000;

/// Smaller context for local models.
pub const LOCAL_CHAT_CONTEXT_CHARS: usize = 5_000;

/// Document text cap for local models.
pub const LOCAL_DOCUMENT_CHAR_LIMIT: usize = 20_000;

/// Where lecture blobs are fetched from.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// Supabase Storage REST API.
    Supabase {
        url: String,
        key: SecretString,
        bucket: String,
    },
    /// A directory on the local filesystem (development and tests).
    Local { root: PathBuf },
}

/// Settings for the content ingestion pipeline.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Retry policy around the lecture analysis call.
    pub retry: RetryPolicy,
    /// Retry policy around blob downloads.
    pub download_retry: RetryPolicy,
    /// How often to check whether an uploaded recording is ready.
    pub media_poll_interval: Duration,
    /// Give up on an upload that is still processing after this long.
    pub media_ready_timeout: Duration,
    /// Truncate extracted document text to this many characters.
    pub document_char_limit: Option<usize>,
    /// Directory for staged files. `None` uses the system temp dir.
    pub staging_dir: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::ingest(),
            download_retry: RetryPolicy::download(),
            media_poll_interval: Duration::from_secs(2),
            media_ready_timeout: Duration::from_secs(600),
            document_char_limit: None,
            staging_dir: None,
        }
    }
}

/// Settings for the question-answering pipeline.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub retry: RetryPolicy,
    /// Transcript prefix length embedded in each prompt.
    pub context_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::chat(),
            context_chars: DEFAULT_CHAT_CONTEXT_CHARS,
        }
    }
}

/// Top-level worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub db_path: PathBuf,
    /// Pause between scheduler ticks.
    pub tick_interval: Duration,
    /// Directory for daily rolling log files, if file logging is wanted.
    pub log_dir: Option<PathBuf>,
    pub llm: LlmConfig,
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
    pub chat: ChatConfig,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let backend = match get("LUMEN_LLM_BACKEND") {
            Some(raw) => raw.parse::<LlmBackend>()?,
            None => LlmBackend::Gemini,
        };
        let api_key = get("GEMINI_API_KEY").map(SecretString::from);
        if backend == LlmBackend::Gemini && api_key.is_none() {
            return Err(ConfigError::MissingEnvVar("GEMINI_API_KEY".to_string()));
        }
        let base_url = match backend {
            LlmBackend::Ollama => get("OLLAMA_BASE_URL"),
            LlmBackend::Gemini => get("GEMINI_BASE_URL"),
        };
        let llm = LlmConfig {
            backend,
            api_key,
            model: get("LUMEN_MODEL").unwrap_or_else(|| backend.default_model().to_string()),
            base_url,
        };

        let bucket = get("LUMEN_STORAGE_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.to_string());
        let storage = match (get("SUPABASE_URL"), get("SUPABASE_KEY")) {
            (Some(url), Some(key)) => StorageConfig::Supabase {
                url: url.trim_end_matches('/').to_string(),
                key: SecretString::from(key),
                bucket,
            },
            (Some(_), None) => return Err(ConfigError::MissingEnvVar("SUPABASE_KEY".to_string())),
            _ => StorageConfig::Local {
                root: get("LUMEN_STORAGE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./data/lectures")),
            },
        };

        let max_attempts: u32 = parse_or(&get, "LUMEN_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        let ingest_backoff = secs_or(&get, "LUMEN_INGEST_BACKOFF_SECS", INGEST_BACKOFF)?;
        let chat_backoff = secs_or(&get, "LUMEN_CHAT_BACKOFF_SECS", CHAT_BACKOFF)?;

        let local = backend == LlmBackend::Ollama;
        let default_context = if local {
            LOCAL_CHAT_CONTEXT_CHARS
        } else {
            DEFAULT_CHAT_CONTEXT_CHARS
        };
        let document_char_limit = match get("LUMEN_DOCUMENT_CHAR_LIMIT") {
            Some(raw) => Some(parse_value("LUMEN_DOCUMENT_CHAR_LIMIT", &raw)?),
            None if local => Some(LOCAL_DOCUMENT_CHAR_LIMIT),
            None => None,
        };

        let ingest = IngestConfig {
            retry: RetryPolicy::new(max_attempts, ingest_backoff),
            download_retry: RetryPolicy::download(),
            media_poll_interval: secs_or(&get, "LUMEN_MEDIA_POLL_SECS", Duration::from_secs(2))?,
            media_ready_timeout: secs_or(
                &get,
                "LUMEN_MEDIA_READY_TIMEOUT_SECS",
                Duration::from_secs(600),
            )?,
            document_char_limit,
            staging_dir: get("LUMEN_STAGING_DIR").map(PathBuf::from),
        };

        let chat = ChatConfig {
            retry: RetryPolicy::new(max_attempts, chat_backoff),
            context_chars: parse_or(&get, "LUMEN_CHAT_CONTEXT_CHARS", default_context)?,
        };

        Ok(Self {
            db_path: get("LUMEN_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/lumen.db")),
            tick_interval: secs_or(&get, "LUMEN_TICK_INTERVAL_SECS", Duration::from_secs(2))?,
            log_dir: get("LUMEN_LOG_DIR").map(PathBuf::from),
            llm,
            storage,
            ingest,
            chat,
        })
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{raw}': {e}"),
    })
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn secs_or<G>(get: &G, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => parse_value::<u64>(key, &raw).map(Duration::from_secs),
        None => Ok(default),
    }
}
