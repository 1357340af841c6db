//! Hosted inference embeddings (Pinecone Inference `/embed`).

use crate::retry::{with_retry, RetryPolicy};
use crate::{ensure_success, EmbedResponse, EmbeddingProvider, InputKind, ProviderError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://api.pinecone.io/embed";
const API_VERSION: &str = "2025-04";

#[derive(Clone, Debug)]
pub struct HostedConfig {
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
    pub dimension: usize,
    pub max_input_chars: usize,
    pub timeout: Duration,
    pub max_retries: usize,
}

#[derive(Clone)]
pub struct HostedInferenceProvider {
    client: Client,
    cfg: Arc<HostedConfig>,
    retry: RetryPolicy,
}

impl HostedInferenceProvider {
    pub fn new(cfg: HostedConfig) -> Result<Self, ProviderError> {
        if cfg.api_key.trim().is_empty() {
            return Err(ProviderError::Config(
                "missing hosted inference API key".into(),
            ));
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
        let body = InferenceRequest {
            model: &self.cfg.model,
            parameters: InferenceParams {
                input_type: match kind {
                    InputKind::Document => "passage",
                    InputKind::Query => "query",
                },
                truncate: "NONE",
                dimension: Some(self.cfg.dimension),
            },
            inputs: texts.iter().map(|t| InferenceInput { text: t }).collect(),
        };
        let resp = self
            .client
            .post(&self.cfg.endpoint)
            .header("Api-Key", &self.cfg.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(&body)
            .send()
            .await?;
        let resp = ensure_success(resp).await?;
        let parsed: InferenceResponse = resp.json().await?;
        if parsed.data.len() != texts.len() {
            return Err(ProviderError::InvalidResponse(format!(
                "{} embeddings returned for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }
        Ok(EmbedResponse {
            vectors: parsed.data.into_iter().map(|d| d.values).collect(),
        })
    }
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    model: &'a str,
    parameters: InferenceParams,
    inputs: Vec<InferenceInput<'a>>,
}

#[derive(Serialize)]
struct InferenceParams {
    input_type: &'static str,
    truncate: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimension: Option<usize>,
}

#[derive(Serialize)]
struct InferenceInput<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct InferenceResponse {
    data: Vec<InferenceData>,
}

#[derive(Deserialize)]
struct InferenceData {
    values: Vec<f32>,
}

#[async_trait::async_trait]
impl EmbeddingProvider for HostedInferenceProvider {
    fn name(&self) -> &str {
        "hosted"
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
        with_retry(&self.retry, "hosted inference", move || {
            self.embed_once(texts, kind)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_passage_and_query_input_types() {
        let texts = vec!["a".to_string(), "b".to_string()];
        let req = InferenceRequest {
            model: "llama-text-embed-v2",
            parameters: InferenceParams {
                input_type: "passage",
                truncate: "NONE",
                dimension: Some(1024),
            },
            inputs: texts.iter().map(|t| InferenceInput { text: t }).collect(),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["parameters"]["input_type"], "passage");
        assert_eq!(v["parameters"]["truncate"], "NONE");
        assert_eq!(v["inputs"][1]["text"], "b");
    }

    #[test]
    fn parses_values_array() {
        let raw = r#"{"model":"m","data":[{"values":[0.1,0.2]}],"usage":{}}"#;
        let parsed: InferenceResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.data[0].values, vec![0.1, 0.2]);
    }
}
