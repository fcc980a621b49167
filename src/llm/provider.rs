//! Inference provider trait and request/response types.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Handle to media uploaded to the provider's file store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaHandle {
    /// Provider-side resource name (e.g. `files/abc123`).
    pub name: String,
    /// URI to reference the media from a generation request.
    pub uri: String,
    pub mime_type: String,
}

/// Processing state of uploaded media.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
    Processing,
    Ready,
    Failed,
}

/// A single generation call: prompt text plus optional media and system
/// instruction.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub media: Option<MediaHandle>,
    pub system: Option<String>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            media: None,
            system: None,
        }
    }

    pub fn with_media(mut self, media: MediaHandle) -> Self {
        self.media = Some(media);
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Generative inference backend.
///
/// Two call shapes: synchronous `generate` with text (and optionally a
/// media handle), and the asynchronous upload → poll → generate path used
/// for audio.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    /// Whether `upload_media` is available.
    fn supports_media(&self) -> bool {
        false
    }

    /// Generate text for a request.
    async fn generate(&self, request: GenerateRequest) -> Result<String, LlmError>;

    /// Upload a local file for later use in a generation request.
    async fn upload_media(&self, path: &Path, mime_type: &str) -> Result<MediaHandle, LlmError> {
        let _ = (path, mime_type);
        Err(LlmError::Unsupported {
            provider: self.model_name().to_string(),
            feature: "media upload".to_string(),
        })
    }

    /// Query the processing state of uploaded media.
    async fn media_state(&self, media: &MediaHandle) -> Result<MediaState, LlmError> {
        let _ = media;
        Err(LlmError::Unsupported {
            provider: self.model_name().to_string(),
            feature: "media state".to_string(),
        })
    }

    /// Remove uploaded media. Best-effort; default is a no-op.
    async fn delete_media(&self, _media: &MediaHandle) -> Result<(), LlmError> {
        Ok(())
    }
}
