//! Google Gemini provider (REST, `generativelanguage.googleapis.com`).
//!
//! Text generation goes through `models/{model}:generateContent`. Audio is
//! uploaded through the Files API, polled until `ACTIVE`, referenced by URI
//! in the generation request and deleted afterwards.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LlmError;
use crate::llm::provider::{GenerateRequest, InferenceProvider, MediaHandle, MediaState};

const PROVIDER: &str = "gemini";

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Per-request limit. Generating from a full lecture recording is slow.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Gemini API provider.
pub struct GeminiProvider {
    client: Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(
        api_key: SecretString,
        model: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(transport)?;
        Ok(Self {
            client,
            api_key,
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    fn file_url(&self, name: &str) -> String {
        format!("{}/v1beta/{}", self.base_url, name)
    }

    fn upload_url(&self) -> String {
        format!("{}/upload/v1beta/files", self.base_url)
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_data: Option<FileData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiFile {
    name: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: GeminiFile,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<GeminiErrorInfo>,
}

/// One entry of `error.details`; only `google.rpc.RetryInfo` is read.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiErrorInfo {
    #[serde(default)]
    retry_delay: Option<String>,
}

// ── Helpers ─────────────────────────────────────────────────────────

fn build_request(request: &GenerateRequest) -> GeminiRequest {
    let mut parts = vec![GeminiPart {
        text: Some(request.prompt.clone()),
        file_data: None,
    }];
    if let Some(ref media) = request.media {
        parts.push(GeminiPart {
            text: None,
            file_data: Some(FileData {
                mime_type: media.mime_type.clone(),
                file_uri: media.uri.clone(),
            }),
        });
    }

    GeminiRequest {
        contents: vec![GeminiContent {
            role: Some("user".to_string()),
            parts,
        }],
        system_instruction: request.system.as_ref().map(|s| GeminiContent {
            role: None,
            parts: vec![GeminiPart {
                text: Some(s.clone()),
                file_data: None,
            }],
        }),
    }
}

/// Concatenate the text parts of the first candidate.
fn response_text(response: GeminiResponse) -> Result<String, LlmError> {
    if let Some(reason) = response
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.clone())
    {
        return Err(LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: format!("prompt blocked: {reason}"),
        });
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: "no candidates in response".to_string(),
        })?;

    let text = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.is_empty() {
        return Err(LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: format!(
                "empty candidate (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            ),
        });
    }
    Ok(text)
}

/// Parse a protobuf duration such as `"17s"` or `"0.5s"`.
fn parse_retry_delay(raw: &str) -> Option<Duration> {
    let secs: f64 = raw.trim().strip_suffix('s')?.parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

fn parse_state(state: Option<&str>) -> MediaState {
    match state {
        Some("ACTIVE") => MediaState::Ready,
        Some("FAILED") => MediaState::Failed,
        _ => MediaState::Processing,
    }
}

/// Map an HTTP failure to a classified `LlmError`.
pub(crate) fn classify_http_error(status: StatusCode, body: &str) -> LlmError {
    let detail = serde_json::from_str::<GeminiErrorBody>(body).ok().map(|b| b.error);
    let api_status = detail.as_ref().map(|d| d.status.as_str()).unwrap_or("");
    let message = detail
        .as_ref()
        .map(|d| d.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.chars().take(300).collect());

    if status == StatusCode::TOO_MANY_REQUESTS || api_status == "RESOURCE_EXHAUSTED" {
        let retry_after = detail.as_ref().and_then(|d| {
            d.details
                .iter()
                .find_map(|info| info.retry_delay.as_deref().and_then(parse_retry_delay))
        });
        return LlmError::RateLimited {
            provider: PROVIDER.to_string(),
            retry_after,
        };
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return LlmError::AuthFailed {
            provider: PROVIDER.to_string(),
        };
    }
    if status.is_server_error() {
        return LlmError::Transport {
            provider: PROVIDER.to_string(),
            reason: format!("HTTP {status}: {message}"),
        };
    }
    LlmError::RequestFailed {
        provider: PROVIDER.to_string(),
        reason: format!("HTTP {status}: {message}"),
    }
}

fn transport(e: reqwest::Error) -> LlmError {
    LlmError::Transport {
        provider: PROVIDER.to_string(),
        reason: e.to_string(),
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_http_error(status, &body))
}

async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, LlmError> {
    response.json().await.map_err(|e| LlmError::InvalidResponse {
        provider: PROVIDER.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl InferenceProvider for GeminiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn supports_media(&self) -> bool {
        true
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, LlmError> {
        let body = build_request(&request);
        let response = self
            .client
            .post(self.generate_url())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        let response = check(response).await?;
        let parsed: GeminiResponse = decode(response).await?;
        response_text(parsed)
    }

    async fn upload_media(&self, path: &Path, mime_type: &str) -> Result<MediaHandle, LlmError> {
        let bytes = tokio::fs::read(path).await?;
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let metadata = serde_json::json!({ "file": { "display_name": display_name } });
        let metadata_part = reqwest::multipart::Part::text(metadata.to_string())
            .mime_str("application/json")
            .map_err(transport)?;
        let file_part = reqwest::multipart::Part::bytes(bytes)
            .file_name(display_name.clone())
            .mime_str(mime_type)
            .map_err(transport)?;
        let form = reqwest::multipart::Form::new()
            .part("metadata", metadata_part)
            .part("file", file_part);

        let response = self
            .client
            .post(self.upload_url())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .header("X-Goog-Upload-Protocol", "multipart")
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;

        let response = check(response).await?;
        let uploaded: UploadResponse = decode(response).await?;
        debug!(name = %uploaded.file.name, "Uploaded media to Gemini");

        Ok(MediaHandle {
            name: uploaded.file.name,
            uri: uploaded.file.uri,
            mime_type: if uploaded.file.mime_type.is_empty() {
                mime_type.to_string()
            } else {
                uploaded.file.mime_type
            },
        })
    }

    async fn media_state(&self, media: &MediaHandle) -> Result<MediaState, LlmError> {
        let response = self
            .client
            .get(self.file_url(&media.name))
            .header("x-goog-api-key", self.api_key.expose_secret())
            .send()
            .await
            .map_err(transport)?;

        let response = check(response).await?;
        let file: GeminiFile = decode(response).await?;
        Ok(parse_state(file.state.as_deref()))
    }

    async fn delete_media(&self, media: &MediaHandle) -> Result<(), LlmError> {
        let response = self
            .client
            .delete(self.file_url(&media.name))
            .header("x-goog-api-key", self.api_key.expose_secret())
            .send()
            .await
            .map_err(transport)?;
        check(response).await?;
        Ok(())
    }
}
