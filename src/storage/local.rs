//! Directory-backed blob store.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage::BlobStore;

/// Serves objects from files under a root directory.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Resolve `key` under the root. Keys may not escape it.
    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || relative.as_os_str().is_empty() {
            return Err(StorageError::Rejected {
                key: key.to_string(),
                reason: "key must be a relative path inside the storage root".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalStorage {
    fn name(&self) -> &str {
        "local"
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                tracing::debug!(key, bytes = bytes.len(), "Read local blob");
                Ok(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                bucket: self.root.display().to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}
