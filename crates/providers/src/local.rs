//! Local embedding server (text-embeddings-inference style `/embed`).
//!
//! Runs a sentence-transformers model such as `all-MiniLM-L6-v2` on the
//! same machine; no credentials, short inputs.

use crate::retry::{with_retry, RetryPolicy};
use crate::{ensure_success, EmbedResponse, EmbeddingProvider, InputKind, ProviderError};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

pub const DEFAULT_URL: &str = "http://127.0.0.1:8080";
/// 512 word pieces at roughly four characters each.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 2048;

#[derive(Clone, Debug)]
pub struct LocalConfig {
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub max_input_chars: usize,
    pub timeout: Duration,
    pub max_retries: usize,
}

#[derive(Clone)]
pub struct LocalProvider {
    client: Client,
    endpoint: String,
    cfg: LocalConfig,
    retry: RetryPolicy,
}

impl LocalProvider {
    pub fn new(cfg: LocalConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| ProviderError::Config(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/embed", cfg.base_url.trim_end_matches('/')),
            retry: RetryPolicy::new(cfg.max_retries),
            cfg,
        })
    }

    async fn embed_once(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        #[derive(Serialize)]
        struct EmbedRequest<'a> {
            inputs: &'a [String],
            normalize: bool,
            truncate: bool,
        }

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest {
                inputs: texts,
                normalize: true,
                truncate: false,
            })
            .send()
            .await?;
        let resp = ensure_success(resp).await?;
        let vectors: Vec<Vec<f32>> = resp.json().await?;
        if vectors.len() != texts.len() {
            return Err(ProviderError::InvalidResponse(format!(
                "{} embeddings returned for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(EmbedResponse { vectors })
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn dimension(&self) -> usize {
        self.cfg.dimension
    }

    fn max_input_chars(&self) -> usize {
        self.cfg.max_input_chars
    }

    async fn embed(
        &self,
        texts: &[String],
        _kind: InputKind,
    ) -> Result<EmbedResponse, ProviderError> {
        if texts.is_empty() {
            return Ok(EmbedResponse { vectors: vec![] });
        }
        with_retry(&self.retry, "local embedding", move || self.embed_once(texts)).await
    }
}
