//! Qdrant REST client: one point per document with a named dense vector and a
//! named sparse vector, hybrid retrieval fused with reciprocal rank fusion.

use crate::retry::{with_retry, RetryPolicy};
use crate::{ensure_success, ProviderError};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

pub const DENSE_VECTOR: &str = "dense";
pub const SPARSE_VECTOR: &str = "sparse";

#[derive(Clone, Debug)]
pub struct QdrantConfig {
    pub url: String,
    pub collection: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_retries: usize,
}

#[derive(Clone)]
pub struct QdrantClient {
    client: Client,
    cfg: QdrantConfig,
    retry: RetryPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PointVectors {
    pub dense: Vec<f32>,
    #[serde(skip_serializing_if = "SparseVector::is_empty")]
    pub sparse: SparseVector,
}

#[derive(Debug, Clone, Serialize)]
pub struct QdrantPoint {
    pub id: String,
    pub vector: PointVectors,
    pub payload: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrievedPoint {
    pub id: serde_json::Value,
    #[serde(default)]
    pub payload: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScoredPoint {
    pub id: serde_json::Value,
    pub score: f32,
    #[serde(default)]
    pub payload: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Renders a point id (uuid string or integer) as a plain string.
pub fn id_string(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub dense_dimension: Option<usize>,
    pub points_count: u64,
}

#[derive(Debug, Clone)]
pub struct ScrollPage {
    pub points: Vec<RetrievedPoint>,
    pub next_offset: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    result: T,
}

impl QdrantClient {
    pub fn new(cfg: QdrantConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| ProviderError::Config(e.to_string()))?;
        Ok(Self {
            client,
            retry: RetryPolicy::new(cfg.max_retries),
            cfg,
        })
    }

    pub fn collection(&self) -> &str {
        &self.cfg.collection
    }

    fn url(&self, suffix: &str) -> String {
        format!(
            "{}/collections/{}{}",
            self.cfg.url.trim_end_matches('/'),
            self.cfg.collection,
            suffix
        )
    }

    fn builder(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, url);
        if let Some(key) = &self.cfg.api_key {
            builder = builder.header("api-key", key);
        }
        builder
    }

    async fn call_once<B, T>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<T, ProviderError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let mut builder = self.builder(method, url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let resp = ensure_success(builder.send().await?).await?;
        let env: Envelope<T> = resp.json().await?;
        Ok(env.result)
    }

    async fn call<B, T>(
        &self,
        label: &str,
        method: Method,
        url: String,
        body: Option<&B>,
    ) -> Result<T, ProviderError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = url.as_str();
        with_retry(&self.retry, label, move || {
            self.call_once(method.clone(), url, body)
        })
        .await
    }

    /// Collection metadata, or `None` when the collection does not exist.
    pub async fn collection_info(&self) -> Result<Option<CollectionInfo>, ProviderError> {
        let resp = self.builder(Method::GET, &self.url("")).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = ensure_success(resp).await?;
        let env: Envelope<serde_json::Value> = resp.json().await?;
        Ok(Some(parse_collection_info(&env.result)))
    }

    pub async fn create_collection(&self, dimension: usize) -> Result<(), ProviderError> {
        let body = json!({
            "vectors": { DENSE_VECTOR: { "size": dimension, "distance": "Dot" } },
            "sparse_vectors": { SPARSE_VECTOR: {} },
        });
        let _: serde_json::Value = self
            .call("qdrant create collection", Method::PUT, self.url(""), Some(&body))
            .await?;
        Ok(())
    }

    pub async fn upsert(&self, points: Vec<QdrantPoint>) -> Result<(), ProviderError> {
        let body = json!({ "points": points });
        let _: serde_json::Value = self
            .call(
                "qdrant upsert",
                Method::PUT,
                self.url("/points?wait=true"),
                Some(&body),
            )
            .await?;
        Ok(())
    }

    pub async fn retrieve(&self, ids: &[String]) -> Result<Vec<RetrievedPoint>, ProviderError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let body = json!({ "ids": ids, "with_payload": true, "with_vector": false });
        self.call("qdrant retrieve", Method::POST, self.url("/points"), Some(&body))
            .await
    }

    pub async fn scroll(
        &self,
        offset: Option<serde_json::Value>,
        limit: usize,
    ) -> Result<ScrollPage, ProviderError> {
        #[derive(Deserialize)]
        struct Raw {
            points: Vec<RetrievedPoint>,
            next_page_offset: Option<serde_json::Value>,
        }
        let mut body = json!({ "limit": limit, "with_payload": true, "with_vector": false });
        if let Some(offset) = offset {
            body["offset"] = offset;
        }
        let raw: Raw = self
            .call(
                "qdrant scroll",
                Method::POST,
                self.url("/points/scroll"),
                Some(&body),
            )
            .await?;
        Ok(ScrollPage {
            points: raw.points,
            next_offset: raw.next_page_offset,
        })
    }

    pub async fn delete(&self, ids: &[String]) -> Result<(), ProviderError> {
        if ids.is_empty() {
            return Ok(());
        }
        let body = json!({ "points": ids });
        let _: serde_json::Value = self
            .call(
                "qdrant delete",
                Method::POST,
                self.url("/points/delete?wait=true"),
                Some(&body),
            )
            .await?;
        Ok(())
    }

    /// Dense plus sparse prefetch fused with RRF. Falls back to dense only
    /// when the sparse query has no terms.
    pub async fn query_hybrid(
        &self,
        dense: &[f32],
        sparse: &SparseVector,
        limit: usize,
        prefetch_limit: usize,
    ) -> Result<Vec<ScoredPoint>, ProviderError> {
        #[derive(Deserialize)]
        struct Raw {
            points: Vec<ScoredPoint>,
        }
        let body = hybrid_query_body(dense, sparse, limit, prefetch_limit);
        let raw: Raw = self
            .call(
                "qdrant query",
                Method::POST,
                self.url("/points/query"),
                Some(&body),
            )
            .await?;
        Ok(raw.points)
    }
}

fn hybrid_query_body(
    dense: &[f32],
    sparse: &SparseVector,
    limit: usize,
    prefetch_limit: usize,
) -> serde_json::Value {
    if sparse.is_empty() {
        return json!({
            "query": dense,
            "using": DENSE_VECTOR,
            "limit": limit,
            "with_payload": true,
        });
    }
    json!({
        "prefetch": [
            { "query": dense, "using": DENSE_VECTOR, "limit": prefetch_limit },
            { "query": sparse, "using": SPARSE_VECTOR, "limit": prefetch_limit },
        ],
        "query": { "fusion": "rrf" },
        "limit": limit,
        "with_payload": true,
    })
}

fn parse_collection_info(result: &serde_json::Value) -> CollectionInfo {
    let vectors = &result["config"]["params"]["vectors"];
    let dense_dimension = vectors[DENSE_VECTOR]["size"]
        .as_u64()
        .or_else(|| vectors["size"].as_u64())
        .map(|v| v as usize);
    CollectionInfo {
        dense_dimension,
        points_count: result["points_count"].as_u64().unwrap_or(0),
    }
}
