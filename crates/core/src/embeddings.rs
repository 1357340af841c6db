use crate::error::IndexError;
use crate::models::EmbeddingVectors;
use crate::sampling::sample;
use crate::sparse::SparseEncoder;
use providers::{EmbeddingProvider, InputKind};
use std::sync::Arc;
use tracing::debug;

/// Dense embedding through the configured provider plus a locally computed
/// sparse vector over the same text.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    sparse: SparseEncoder,
    head_ratio: f32,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, sparse: SparseEncoder, head_ratio: f32) -> Self {
        Self {
            provider,
            sparse,
            head_ratio,
        }
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Fails with a configuration error when the store was built for a
    /// different dimension.
    pub fn validate_dimension(&self, store_dimension: usize) -> Result<(), IndexError> {
        if store_dimension != self.dimension() {
            return Err(IndexError::Configuration(format!(
                "embedding provider {} produces {} dimensions but the vector collection expects {}",
                self.provider_name(),
                self.dimension(),
                store_dimension
            )));
        }
        Ok(())
    }

    pub async fn embed_document(&self, text: &str) -> Result<EmbeddingVectors, IndexError> {
        self.embed(text, InputKind::Document).await
    }

    pub async fn embed_query(&self, text: &str) -> Result<EmbeddingVectors, IndexError> {
        self.embed(text, InputKind::Query).await
    }

    async fn embed(&self, text: &str, kind: InputKind) -> Result<EmbeddingVectors, IndexError> {
        let limit = self.provider.max_input_chars();
        let input = sample(text, limit, self.head_ratio);
        if input.len() != text.len() {
            debug!(
                "sampled {} chars down to {} for {}",
                text.chars().count(),
                limit,
                self.provider_name()
            );
        }
        let resp = self.provider.embed(&[input.clone()], kind).await?;
        let mut dense = resp.vectors.into_iter().next().ok_or_else(|| {
            IndexError::TransientProvider("embedding provider returned no vector".into())
        })?;
        if dense.len() != self.dimension() {
            return Err(IndexError::Configuration(format!(
                "provider {} returned {} dimensions, expected {}",
                self.provider_name(),
                dense.len(),
                self.dimension()
            )));
        }
        normalize(&mut dense);
        let sparse = match kind {
            InputKind::Document => self.sparse.encode_document(&input),
            InputKind::Query => self.sparse.encode_query(&input),
        };
        Ok(EmbeddingVectors {
            dimension: dense.len(),
            dense,
            sparse,
            provider: self.provider_name().to_string(),
        })
    }
}

/// Unit length so dot product ranks like cosine.
fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
