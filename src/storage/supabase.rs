//! Supabase Storage adapter.
//!
//! Objects are downloaded with an authenticated GET on
//! `{url}/storage/v1/object/{bucket}/{key}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};

use crate::error::StorageError;
use crate::storage::BlobStore;

/// Per-download limit.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Supabase Storage client for a single bucket.
pub struct SupabaseStorage {
    client: Client,
    base_url: String,
    key: SecretString,
    bucket: String,
}

impl SupabaseStorage {
    pub fn new(
        base_url: impl Into<String>,
        key: SecretString,
        bucket: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| StorageError::Transport {
                key: base_url.clone(),
                reason: format!("client setup failed: {e}"),
            })?;
        Ok(Self {
            client,
            base_url,
            key,
            bucket: bucket.into(),
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            self.bucket,
            key.trim_start_matches('/')
        )
    }
}

/// Map a non-success status onto the storage error taxonomy.
fn classify_status(status: StatusCode, bucket: &str, key: &str, body: &str) -> StorageError {
    // Supabase reports missing objects as 400 with a `not_found` body as well as 404.
    if status == StatusCode::NOT_FOUND || body.contains("not_found") || body.contains("Object not found")
    {
        return StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        };
    }
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        return StorageError::Transport {
            key: key.to_string(),
            reason: format!("HTTP {status}"),
        };
    }
    StorageError::Rejected {
        key: key.to_string(),
        reason: format!("HTTP {status}: {}", body.chars().take(200).collect::<String>()),
    }
}

#[async_trait]
impl BlobStore for SupabaseStorage {
    fn name(&self) -> &str {
        "supabase"
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let secret = self.key.expose_secret();
        let response = self
            .client
            .get(self.object_url(key))
            .bearer_auth(secret)
            .header("apikey", secret)
            .send()
            .await
            .map_err(|e| StorageError::Transport {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &self.bucket, key, &body));
        }

        let bytes = response.bytes().await.map_err(|e| StorageError::Transport {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        tracing::debug!(key, bytes = bytes.len(), "Downloaded blob");
        Ok(bytes.to_vec())
    }
}
