//! Plain-text extraction from uploaded documents.
//!
//! PDFs are read with `lopdf`, page by page; pages that fail to decode are
//! skipped. Text files are read as lossy UTF-8.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ExtractionError;
use crate::pipeline::types::extension;

/// Turns a staged document into plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract the text of the file at `path`. Empty output is an error.
    async fn extract(&self, path: &Path) -> Result<String, ExtractionError>;
}

/// Extractor for `.pdf` and `.txt` files.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentExtractor;

impl DocumentExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TextExtractor for DocumentExtractor {
    async fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let owned: PathBuf = path.to_path_buf();
        let shown = path.display().to_string();

        // lopdf is synchronous and CPU-bound
        let text = tokio::task::spawn_blocking(move || extract_sync(&owned))
            .await
            .map_err(|e| ExtractionError::Unreadable {
                path: shown.clone(),
                reason: format!("extraction task failed: {e}"),
            })??;

        if text.trim().is_empty() {
            return Err(ExtractionError::Empty { path: shown });
        }
        debug!(path = %shown, chars = text.chars().count(), "Document text extracted");
        Ok(text)
    }
}

fn extract_sync(path: &Path) -> Result<String, ExtractionError> {
    match extension(&path.to_string_lossy()).as_deref() {
        Some("pdf") => extract_pdf(path),
        Some("txt") => extract_txt(path),
        other => Err(ExtractionError::Unsupported {
            extension: other.unwrap_or("").to_string(),
        }),
    }
}

fn extract_txt(path: &Path) -> Result<String, ExtractionError> {
    let bytes = std::fs::read(path).map_err(|e| ExtractionError::Unreadable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn extract_pdf(path: &Path) -> Result<String, ExtractionError> {
    let doc = lopdf::Document::load(path).map_err(|e| ExtractionError::Unreadable {
        path: path.display().to_string(),
        reason: format!("Failed to load PDF: {e}"),
    })?;

    let pages = doc.get_pages();
    debug!(page_count = pages.len(), "Extracting text from PDF");

    let mut text = String::new();
    for page_num in pages.keys() {
        match doc.extract_text(&[*page_num]) {
            Ok(page_text) => {
                text.push_str(page_text.trim_end());
                text.push('\n');
            }
            Err(e) => {
                warn!(page = page_num, error = %e, "Failed to extract text from page, skipping");
            }
        }
    }
    Ok(text)
}
