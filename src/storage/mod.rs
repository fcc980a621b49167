//! Blob storage for uploaded lecture files.
//!
//! - **Supabase**: Storage REST API, used in production
//! - **Local**: a directory on disk, for development and tests

pub mod local;
pub mod supabase;

pub use local::LocalStorage;
pub use supabase::SupabaseStorage;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StorageConfig;
use crate::error::StorageError;

/// Read access to the object store holding uploaded lectures.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Short backend name, for logging.
    fn name(&self) -> &str;

    /// Download the object stored under `key`.
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError>;
}

/// Create a blob store from configuration.
pub fn create_blob_store(config: &StorageConfig) -> Result<Arc<dyn BlobStore>, StorageError> {
    match config {
        StorageConfig::Supabase { url, key, bucket } => {
            tracing::info!("Using Supabase storage (bucket: {})", bucket);
            Ok(Arc::new(SupabaseStorage::new(
                url,
                key.clone(),
                bucket,
                supabase::REQUEST_TIMEOUT,
            )?))
        }
        StorageConfig::Local { root } => {
            tracing::info!("Using local storage at {}", root.display());
            Ok(Arc::new(LocalStorage::new(root)))
        }
    }
}
