//! Bounded retry with rate-limit-aware backoff.
//!
//! Only failures that signal transient capacity problems are retried.
//! Everything else is surfaced on the first attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{LlmError, StorageError};

/// Default number of attempts (including the first one).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Backoff for bulk lecture ingestion.
pub const INGEST_BACKOFF: Duration = Duration::from_secs(30);

/// Backoff for interactive chat answers.
pub const CHAT_BACKOFF: Duration = Duration::from_secs(5);

/// Pause between blob download attempts.
pub const DOWNLOAD_BACKOFF: Duration = Duration::from_secs(2);

/// Errors that know whether they are worth another attempt.
pub trait Retryable {
    fn is_transient(&self) -> bool;

    /// Server-suggested wait before the next attempt, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for LlmError {
    fn is_transient(&self) -> bool {
        self.is_rate_limited()
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl Retryable for StorageError {
    fn is_transient(&self) -> bool {
        StorageError::is_transient(self)
    }
}

/// Retry configuration for one call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial one).
    pub max_attempts: u32,
    /// Pause before each retry unless the error carries its own hint.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Policy for lecture ingestion (long backoff).
    pub const fn ingest() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, INGEST_BACKOFF)
    }

    /// Policy for chat answers (short backoff).
    pub const fn chat() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, CHAT_BACKOFF)
    }

    /// Policy for blob downloads.
    pub const fn download() -> Self {
        Self::new(2, DOWNLOAD_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::ingest()
    }
}

/// Run `op` under `policy`.
///
/// Transient failures sleep for the error's `retry_after` hint, or
/// `policy.backoff` without one, and try again until `max_attempts` is
/// reached; the last failure is returned on exhaustion.
/// Non-transient failures return immediately without sleeping.
pub async fn invoke<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(label, attempt, "Call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let backoff = e.retry_after().unwrap_or(policy.backoff);
                warn!(
                    label,
                    attempt,
                    max_attempts,
                    backoff_secs = backoff.as_secs_f64(),
                    error = %e,
                    "Transient failure, backing off"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(label, attempts = attempt, error = %e, "Retries exhausted");
                }
                return Err(e);
            }
        }
    }
}
