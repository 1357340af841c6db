//! OpenAI-compatible embeddings endpoint (OpenAI, Voyage AI and friends).

use crate::retry::{with_retry, RetryPolicy};
use crate::{ensure_success, EmbedResponse, EmbeddingProvider, InputKind, ProviderError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: String,
    /// Full embeddings URL, e.g. `https://api.openai.com/v1/embeddings`.
    pub endpoint: String,
    pub embedding_model: String,
    pub dimension: usize,
    pub max_input_chars: usize,
    /// Voyage style `input_type`; sent as `document`/`query` when set.
    pub send_input_type: bool,
    /// Requested output dimension for models with a configurable size.
    pub output_dimension: Option<usize>,
    pub timeout: Duration,
    pub max_retries: usize,
}

#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    cfg: Arc<OpenAiConfig>,
    retry: RetryPolicy,
}

impl OpenAiProvider {
    pub fn new(cfg: OpenAiConfig) -> Result<Self, ProviderError> {
        if cfg.api_key.trim().is_empty() {
            return Err(ProviderError::Config("missing embedding API key".into()));
        }
        if cfg.embedding_model.trim().is_empty() {
            return Err(ProviderError::Config("missing embedding model name".into()));
        }
        let client = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| ProviderError::Config(e.to_string()))?;
        Ok(Self {
            client,
            retry: RetryPolicy::new(cfg.max_retries),
            cfg: Arc::new(cfg),
        })
    }

    async fn embed_once(
        &self,
        texts: &[String],
        kind: InputKind,
    ) -> Result<EmbedResponse, ProviderError> {
        let body = EmbedRequest {
            model: &self.cfg.embedding_model,
            input: texts,
            input_type: self.cfg.send_input_type.then_some(kind),
            output_dimension: self.cfg.output_dimension,
        };

        let resp = self
            .client
            .post(&self.cfg.endpoint)
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await?;
        let resp = ensure_success(resp).await?;

        let mut parsed: EmbeddingApiResponse = resp.json().await?;
        parsed.data.sort_by_key(|d| d.index);
        if parsed.data.len() != texts.len() {
            return Err(ProviderError::InvalidResponse(format!(
                "{} embeddings returned for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }

        Ok(EmbedResponse {
            vectors: parsed.data.into_iter().map(|d| d.embedding).collect(),
        })
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    input_type: Option<InputKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimension: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[async_trait::async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "api"
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
        kind: InputKind,
    ) -> Result<EmbedResponse, ProviderError> {
        if texts.is_empty() {
            return Ok(EmbedResponse { vectors: vec![] });
        }
        with_retry(&self.retry, "embedding api", move || {
            self.embed_once(texts, kind)
        })
        .await
    }
}
