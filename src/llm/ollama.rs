//! Local Ollama provider, text only.
//!
//! Runs against a model served on the local machine. There is no file
//! store, so audio lectures cannot be processed with this backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::provider::{GenerateRequest, InferenceProvider};

const PROVIDER: &str = "ollama";

/// Default local endpoint.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Per-request limit. Local models on CPU answer slowly.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Ollama chat provider.
pub struct OllamaProvider {
    client: Client,
    model: String,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(
        model: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport)?;
        Ok(Self {
            client,
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
}

fn build_request(model: &str, request: &GenerateRequest) -> OllamaRequest {
    let mut messages = Vec::with_capacity(2);
    if let Some(ref system) = request.system {
        messages.push(OllamaMessage {
            role: "system".to_string(),
            content: system.clone(),
        });
    }
    messages.push(OllamaMessage {
        role: "user".to_string(),
        content: request.prompt.clone(),
    });

    OllamaRequest {
        model: model.to_string(),
        messages,
        stream: false,
    }
}

fn transport(e: reqwest::Error) -> LlmError {
    LlmError::Transport {
        provider: PROVIDER.to_string(),
        reason: e.to_string(),
    }
}

fn classify(status: StatusCode, body: &str) -> LlmError {
    let reason = format!("HTTP {status}: {}", body.chars().take(300).collect::<String>());
    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
        // Ollama answers 503 when its request queue is full.
        LlmError::RateLimited {
            provider: PROVIDER.to_string(),
            retry_after: None,
        }
    } else if status.is_server_error() {
        LlmError::Transport {
            provider: PROVIDER.to_string(),
            reason,
        }
    } else {
        LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason,
        }
    }
}

#[async_trait]
impl InferenceProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, LlmError> {
        if request.media.is_some() {
            return Err(LlmError::Unsupported {
                provider: PROVIDER.to_string(),
                feature: "media input".to_string(),
            });
        }

        let body = build_request(&self.model, &request);
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, &body));
        }

        let parsed: OllamaResponse =
            response
                .json()
                .await
                .map_err(|e| LlmError::InvalidResponse {
                    provider: PROVIDER.to_string(),
                    reason: e.to_string(),
                })?;
        Ok(parsed.message.content)
    }
}
