//! Document Processor: concurrent, size-capped downloads of opportunity
//! attachments, uploaded to an object store and best-effort text-extracted.
//!
//! Grounded directly in `inline_css::downloaders`'s streaming core: a
//! Content-Length pre-check, a pre-allocated buffer, and a running-total
//! check during the `bytes_stream()` loop so an oversized body is abandoned
//! mid-download rather than fully buffered first.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use md5::{Digest, Md5};
use reqwest::Client;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::utils::constants::{CHROME_USER_AGENT, MAX_DOCUMENT_BYTES};
use crate::utils::url_utils::host_key;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("object store error: {0}")]
    ObjectStore(String),
}

/// Storage sink for downloaded document bytes. Defaults to a local
/// filesystem tree rooted at a base directory (grounded in
/// `content_saver`'s plain `tokio::fs::write` pattern); a networked backend
/// implements the same trait.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), DocumentError>;
}

pub struct FilesystemObjectStore {
    base_dir: std::path::PathBuf,
}

impl FilesystemObjectStore {
    #[must_use]
    pub fn new(base_dir: impl Into<std::path::PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }
}

#[async_trait::async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<(), DocumentError> {
        let path = self.base_dir.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DocumentError::ObjectStore(e.to_string()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| DocumentError::ObjectStore(e.to_string()))
    }
}

/// Best-effort text-extraction capability, external to this crate.
#[async_trait::async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, bytes: &[u8], mime_type: &str) -> anyhow::Result<ExtractedText>;
}

#[derive(Debug, Clone, Default)]
pub struct ExtractedText {
    pub text: String,
    pub pages: Option<u32>,
    pub has_tables: bool,
    pub has_images: bool,
}

/// Output of processing one document URL.
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub source_url: String,
    pub object_key: String,
    pub text: String,
    pub payload: serde_json::Value,
    pub pages: Option<u32>,
    pub has_tables: bool,
    pub has_images: bool,
    pub size_bytes: i64,
    pub mime_type: String,
    pub status: crate::models::DocumentStatus,
    pub error: Option<String>,
}

pub struct DocumentProcessor {
    http: Client,
    object_store: Arc<dyn ObjectStore>,
    text_extractor: Option<Arc<dyn TextExtractor>>,
    per_host_concurrency: usize,
}

impl DocumentProcessor {
    #[must_use]
    pub fn new(http: Client, object_store: Arc<dyn ObjectStore>, text_extractor: Option<Arc<dyn TextExtractor>>) -> Self {
        Self {
            http,
            object_store,
            text_extractor,
            per_host_concurrency: 4,
        }
    }

    /// Download, store, and text-extract every URL in `urls`, grouping
    /// concurrency per host with per-host limits. Never returns an `Err` —
    /// a failed document becomes
    /// a `ProcessedDocument` with `status=failed`, since this is best-effort
    /// and must never block Job completion.
    pub async fn process_batch(&self, urls: &[String]) -> Vec<ProcessedDocument> {
        let mut by_host: HashMap<String, Vec<String>> = HashMap::new();
        for url in urls {
            let host = host_key(url).unwrap_or_else(|| "unknown".to_string());
            by_host.entry(host).or_default().push(url.clone());
        }

        let mut handles = Vec::new();
        for (_, host_urls) in by_host {
            let semaphore = Arc::new(Semaphore::new(self.per_host_concurrency));
            for url in host_urls {
                let semaphore = semaphore.clone();
                let http = self.http.clone();
                let object_store = self.object_store.clone();
                let text_extractor = self.text_extractor.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    process_one(&http, object_store.as_ref(), text_extractor.as_deref(), &url).await
                }));
            }
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(doc) => results.push(doc),
                Err(e) => warn!(error = %e, "document processing task panicked"),
            }
        }
        results
    }
}

async fn process_one(
    http: &Client,
    object_store: &dyn ObjectStore,
    text_extractor: Option<&dyn TextExtractor>,
    url: &str,
) -> ProcessedDocument {
    match download_capped(http, url).await {
        Ok((bytes, content_type)) => {
            let key = object_key_for(url);
            if let Err(e) = object_store.put(&key, &bytes, &content_type).await {
                return failed(url, e.to_string());
            }

            let extracted = match text_extractor {
                Some(extractor) => match extractor.extract(&bytes, &content_type).await {
                    Ok(e) => e,
                    Err(e) => {
                        warn!(url, error = %e, "text extraction failed, document kept with empty text");
                        ExtractedText::default()
                    }
                },
                None => ExtractedText::default(),
            };

            info!(url, key, bytes = bytes.len(), "document stored");
            ProcessedDocument {
                source_url: url.to_string(),
                object_key: key,
                text: extracted.text,
                payload: serde_json::Value::Null,
                pages: extracted.pages,
                has_tables: extracted.has_tables,
                has_images: extracted.has_images,
                size_bytes: bytes.len() as i64,
                mime_type: content_type,
                status: crate::models::DocumentStatus::Done,
                error: None,
            }
        }
        Err(e) => failed(url, e),
    }
}

fn failed(url: &str, reason: String) -> ProcessedDocument {
    ProcessedDocument {
        source_url: url.to_string(),
        object_key: String::new(),
        text: String::new(),
        payload: serde_json::Value::Null,
        pages: None,
        has_tables: false,
        has_images: false,
        size_bytes: 0,
        mime_type: String::new(),
        status: crate::models::DocumentStatus::Failed,
        error: Some(reason),
    }
}

async fn download_capped(http: &Client, url: &str) -> Result<(Vec<u8>, String), String> {
    let response = http
        .get(url)
        .header("User-Agent", CHROME_USER_AGENT)
        .header("Accept", "application/pdf,*/*;q=0.8")
        .send()
        .await
        .map_err(|e| format!("download request failed: {e}"))?;

    if !response.status().is_success() {
        return Err(format!("HTTP {}", response.status()));
    }

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let expected_size = response.content_length().unwrap_or(0);
    if expected_size > MAX_DOCUMENT_BYTES {
        return Err(format!("document too large: {expected_size} bytes exceeds cap of {MAX_DOCUMENT_BYTES}"));
    }

    let mut buffer = if expected_size > 0 {
        Vec::with_capacity(expected_size as usize)
    } else {
        Vec::new()
    };
    let mut total_size = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| format!("stream error: {e}"))?;
        let new_total = total_size + chunk.len() as u64;
        if new_total > MAX_DOCUMENT_BYTES {
            return Err(format!("document exceeded size cap during download: {new_total} bytes"));
        }
        buffer.extend_from_slice(&chunk);
        total_size = new_total;
    }

    Ok((buffer, content_type))
}

/// `pdfs/{YYYYMMDD_HHMMSS}_{md5(url)}.pdf`.
fn object_key_for(url: &str) -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let mut hasher = Md5::new();
    hasher.update(url.as_bytes());
    let digest = hasher.finalize();
    format!("pdfs/{timestamp}_{}.pdf", hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_has_expected_shape() {
        let key = object_key_for("https://example.gov/tender-42.pdf");
        assert!(key.starts_with("pdfs/"));
        assert!(key.ends_with(".pdf"));
        assert_eq!(key.len(), "pdfs/".len() + "YYYYMMDD_HHMMSS".len() + 1 + 32 + ".pdf".len());
    }

    #[test]
    fn object_key_is_deterministic_per_url() {
        let a = object_key_for("https://example.gov/same.pdf");
        let b = object_key_for("https://example.gov/same.pdf");
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn filesystem_object_store_writes_bytes_under_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemObjectStore::new(dir.path());
        store.put("pdfs/x.pdf", b"hello", "application/pdf").await.unwrap();
        let contents = tokio::fs::read(dir.path().join("pdfs/x.pdf")).await.unwrap();
        assert_eq!(contents, b"hello");
    }
}
