//! Provider abstractions for embeddings, OCR engines and the vector database.
//!
//! Every network provider is reached over its documented HTTP contract; this
//! crate owns the request/response shapes and the retry policy, callers own
//! ordering, fallback and timeouts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

mod azure;
pub mod docintel;
pub mod hosted;
pub mod local;
pub mod openai;
pub mod qdrant;
pub mod retry;
#[cfg(feature = "ocr")]
pub mod tesseract;
pub mod vision;

pub use azure::AzureConfig;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("not implemented")]
    NotImplemented,
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("throttled (status {status})")]
    Throttled {
        status: u16,
        retry_after: Option<Duration>,
    },
    #[error("server error (status {status}): {body}")]
    Server { status: u16, body: String },
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),
    #[error("provider misconfigured: {0}")]
    Config(String),
}

impl ProviderError {
    /// Errors worth retrying with backoff: throttling, 5xx, timeouts and
    /// dropped connections.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Throttled { .. }
                | ProviderError::Server { .. }
                | ProviderError::Timeout(_)
                | ProviderError::Connect(_)
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::Throttled { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_body() {
            ProviderError::Connect(err.to_string())
        } else if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else {
            ProviderError::RequestFailed(err.to_string())
        }
    }
}

/// Maps a non-success HTTP response onto the error taxonomy.
pub(crate) async fn ensure_success(
    resp: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = resp.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
    {
        return Err(ProviderError::Throttled {
            status: status.as_u16(),
            retry_after,
        });
    }
    if status.is_server_error() {
        return Err(ProviderError::Server {
            status: status.as_u16(),
            body,
        });
    }
    Err(ProviderError::RequestFailed(format!(
        "status {} body {}",
        status, body
    )))
}

/// Whether the text is being embedded for storage or for a lookup. Some
/// providers use asymmetric models and need to know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Document,
    Query,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub vectors: Vec<Vec<f32>>,
}

#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Dense vector dimension this provider produces.
    fn dimension(&self) -> usize;

    /// Longest input in characters the provider accepts without clipping.
    fn max_input_chars(&self) -> usize;

    async fn embed(
        &self,
        texts: &[String],
        kind: InputKind,
    ) -> Result<EmbedResponse, ProviderError>;
}

/// A document handed to an OCR engine.
#[derive(Debug, Clone)]
pub struct OcrDocument {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Arc<Vec<u8>>,
    /// Raster images of the pages, when the caller could pull them out of
    /// the container. Engines that only read images use these.
    pub page_images: Vec<Vec<u8>>,
    pub page_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OcrText {
    pub text: String,
    pub pages: u32,
}

/// Observer for per-page OCR progress on multi-page documents.
pub trait PageProgress: Send + Sync {
    fn page_done(&self, engine: &str, page: u32, total: u32);
}

#[async_trait::async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn recognize(
        &self,
        doc: &OcrDocument,
        progress: &dyn PageProgress,
    ) -> Result<OcrText, ProviderError>;
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    embeddings: HashMap<String, Arc<dyn EmbeddingProvider>>,
    ocr: HashMap<String, Arc<dyn OcrEngine>>,
    pub preferred_embedding: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_embedding(mut self, name: &str, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embeddings.insert(name.to_string(), provider);
        self
    }

    pub fn with_ocr(mut self, name: &str, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr.insert(name.to_string(), engine);
        self
    }

    pub fn set_preferred_embedding(mut self, name: &str) -> Self {
        self.preferred_embedding = Some(name.to_string());
        self
    }

    pub fn embedding(
        &self,
        name: Option<&str>,
    ) -> Result<Arc<dyn EmbeddingProvider>, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred_embedding.clone())
            .ok_or_else(|| {
                ProviderError::UnknownProvider("no embedding provider configured".into())
            })?;
        self.embeddings
            .get(&key)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(key))
    }

    /// OCR engine registered under `name`, if that tier is configured.
    pub fn ocr(&self, name: &str) -> Option<Arc<dyn OcrEngine>> {
        self.ocr.get(name).cloned()
    }
}
