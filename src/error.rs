//! Error types for the Lumen worker.

use std::any::Any;
use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Blob store errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object {key} not found in {bucket}")]
    NotFound { bucket: String, key: String },

    #[error("Download of {key} failed: {reason}")]
    Rejected { key: String, reason: String },

    #[error("Transport error fetching {key}: {reason}")]
    Transport { key: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Transport hiccups are worth another attempt; missing or rejected
    /// objects are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transport { .. })
    }
}

/// Document text extraction errors.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Failed to read document {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("No text content extracted from {path}")]
    Empty { path: String },

    #[error("Unsupported document type: {extension}")]
    Unsupported { extension: String },
}

/// How an inference failure should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Quota or rate limit. Worth waiting out.
    RateLimited,
    /// Malformed request, auth failure, rejected content. Fail fast.
    Permanent,
    /// Network or upstream 5xx.
    Transport,
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Transport error talking to {provider}: {reason}")]
    Transport { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Provider {provider} does not support {feature}")]
    Unsupported { provider: String, feature: String },

    #[error("Media {name} failed processing on {provider}")]
    MediaFailed { provider: String, name: String },

    #[error("Media {name} not ready after {waited:?}")]
    MediaTimeout { name: String, waited: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LlmError {
    /// Structured classification used by the retry controller.
    pub fn kind(&self) -> FailureKind {
        match self {
            LlmError::RateLimited { .. } => FailureKind::RateLimited,
            LlmError::Transport { .. } => FailureKind::Transport,
            _ => FailureKind::Permanent,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind() == FailureKind::RateLimited
    }
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Staging failed for note {note_id}: {reason}")]
    Staging { note_id: String, reason: String },

    #[error("Processing panicked: {0}")]
    Panicked(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl PipelineError {
    /// Wrap a caught panic payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        PipelineError::Panicked(message)
    }
}
