//! LLM integration for the Lumen worker.
//!
//! Supports:
//! - **Gemini**: remote API with audio upload via the Files API
//! - **Ollama**: local text-only models
//!
//! Both sit behind the `InferenceProvider` trait. Calls are wrapped by the
//! retry controller in `retry`.

pub mod gemini;
pub mod ollama;
pub mod provider;
pub mod retry;

pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use provider::{GenerateRequest, InferenceProvider, MediaHandle, MediaState};
pub use retry::{Retryable, RetryPolicy};

use std::str::FromStr;
use std::sync::Arc;

use secrecy::SecretString;

use crate::error::{ConfigError, LlmError};

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Gemini,
    Ollama,
}

impl LlmBackend {
    /// Model used when `LUMEN_MODEL` is not set.
    pub fn default_model(&self) -> &'static str {
        match self {
            LlmBackend::Gemini => "gemini-2.5-flash",
            LlmBackend::Ollama => "llama3.2",
        }
    }
}

impl FromStr for LlmBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(LlmBackend::Gemini),
            "ollama" | "local" => Ok(LlmBackend::Ollama),
            other => Err(ConfigError::InvalidValue {
                key: "LUMEN_LLM_BACKEND".to_string(),
                message: format!("unknown backend '{other}' (expected gemini or ollama)"),
            }),
        }
    }
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    /// Required for Gemini, ignored by Ollama.
    pub api_key: Option<SecretString>,
    pub model: String,
    /// Overrides the backend's default endpoint.
    pub base_url: Option<String>,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn InferenceProvider>, LlmError> {
    match config.backend {
        LlmBackend::Gemini => {
            let api_key = config.api_key.clone().ok_or_else(|| LlmError::AuthFailed {
                provider: "gemini".to_string(),
            })?;
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| gemini::DEFAULT_BASE_URL.to_string());
            tracing::info!("Using Gemini (model: {})", config.model);
            Ok(Arc::new(GeminiProvider::new(
                api_key,
                &config.model,
                base_url,
                gemini::REQUEST_TIMEOUT,
            )?))
        }
        LlmBackend::Ollama => {
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| ollama::DEFAULT_BASE_URL.to_string());
            tracing::info!("Using Ollama at {} (model: {})", base_url, config.model);
            Ok(Arc::new(OllamaProvider::new(
                &config.model,
                base_url,
                ollama::REQUEST_TIMEOUT,
            )?))
        }
    }
}
