//! Query path: one embedding, one hybrid query, full text for the hits only.

use crate::config::QueryConfig;
use crate::embeddings::Embedder;
use crate::error::IndexError;
use crate::hybrid::HybridStore;
use crate::models::{Coverage, IndexRecord};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub score: f32,
    pub source_id: String,
    pub file_name: String,
    pub coverage: Coverage,
    pub preview: String,
    /// The preview is shorter than the stored text.
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub hits: Vec<SearchHit>,
}

impl SearchResponse {
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(usize::MAX)
    }
}

/// Text standing in for a record that was stored without content.
fn record_text(record: &IndexRecord) -> String {
    format!(
        "File: {}\nType: .{}\nSize: {} bytes\nLocation: {}\nModified: {}",
        record.file_name,
        record.file_type,
        record.size_bytes,
        record.source_id,
        record.modified_at.to_rfc3339()
    )
}

fn clip(text: &str, chars: usize) -> (String, bool) {
    match text.char_indices().nth(chars) {
        Some((end, _)) => (text[..end].to_string(), true),
        None => (text.to_string(), false),
    }
}

pub async fn search(
    query: &str,
    embedder: &Embedder,
    store: &HybridStore,
    cfg: &QueryConfig,
) -> Result<SearchResponse, IndexError> {
    let vectors = embedder.embed_query(query).await?;
    let scored = store
        .query(&vectors.dense, &vectors.sparse, cfg.top_k)
        .await?;
    debug!("{} hits for {:?}", scored.len(), query);

    let mut texts = Vec::with_capacity(scored.len());
    for hit in scored.into_iter().take(cfg.top_k) {
        let record = match hit.record {
            Some(r) => r,
            None => match store.vectors().get(&hit.doc_id).await? {
                Some(r) => r,
                None => {
                    warn!("hit {} has no record; skipping", hit.doc_id);
                    continue;
                }
            },
        };
        let text = match record.coverage {
            Coverage::Full => match store.fetch(&hit.doc_id).await {
                Ok(Some(t)) => t,
                Ok(None) => {
                    warn!("blob for {} is missing; showing metadata", hit.doc_id);
                    record_text(&record)
                }
                Err(e) => {
                    warn!("blob for {} unreadable: {}; showing metadata", hit.doc_id, e);
                    record_text(&record)
                }
            },
            Coverage::MetadataOnly => record_text(&record),
        };
        texts.push((hit.score, record, text));
    }

    let render = |cap: usize| SearchResponse {
        query: query.to_string(),
        hits: texts
            .iter()
            .map(|(score, record, text)| {
                let (preview, truncated) = clip(text, cap);
                SearchHit {
                    doc_id: record.doc_id.clone(),
                    score: *score,
                    source_id: record.source_id.clone(),
                    file_name: record.file_name.clone(),
                    coverage: record.coverage,
                    preview,
                    truncated,
                }
            })
            .collect(),
    };

    let mut cap = cfg.preview_chars;
    let mut response = render(cap);
    while cap > 0 && response.encoded_len() > cfg.max_response_bytes {
        let size = response.encoded_len();
        let scaled = (cap as f64 * cfg.max_response_bytes as f64 / size as f64) as usize;
        cap = scaled.min(cap - 1);
        response = render(cap);
    }
    if cap < cfg.preview_chars {
        debug!("previews shrunk to {} chars to fit the response limit", cap);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SparseConfig;
    use crate::models::{doc_id, EmbeddingVectors, ExtractionMethod};
    use crate::sparse::SparseEncoder;
    use crate::vectorstore::MemoryVectorStore;
    use chrono::Utc;
    use providers::{EmbedResponse, EmbeddingProvider, InputKind, ProviderError};
    use std::sync::Arc;
    use std::time::Duration;
    use storage::MemoryBlobStore;

    struct Flat;

    #[async_trait::async_trait]
    impl EmbeddingProvider for Flat {
        fn name(&self) -> &str {
            "flat"
        }
        fn dimension(&self) -> usize {
            2
        }
        fn max_input_chars(&self) -> usize {
            1000
        }
        async fn embed(
            &self,
            texts: &[String],
            _kind: InputKind,
        ) -> Result<EmbedResponse, ProviderError> {
            Ok(EmbedResponse {
                vectors: texts.iter().map(|_| vec![1.0, 0.0]).collect(),
            })
        }
    }

    fn record(source: &str, coverage: Coverage) -> IndexRecord {
        IndexRecord {
            doc_id: doc_id(source),
            source_id: source.into(),
            file_name: source.trim_start_matches('/').into(),
            file_type: "txt".into(),
            size_bytes: 10,
            modified_at: Utc::now(),
            coverage,
            extraction_method: match coverage {
                Coverage::Full => ExtractionMethod::Direct,
                Coverage::MetadataOnly => ExtractionMethod::MetadataOnly,
            },
            page_count: 1,
            indexed_at: Utc::now(),
            content_hash: None,
        }
    }

    async fn fixture() -> (Embedder, HybridStore, Arc<MemoryBlobStore>) {
        let embedder = Embedder::new(Arc::new(Flat), SparseEncoder::new(&SparseConfig::default()), 0.8);
        let blobs = Arc::new(MemoryBlobStore::new());
        let store = HybridStore::new(
            Arc::new(MemoryVectorStore::with_dimension(2)),
            blobs.clone(),
            Duration::from_secs(5),
        );
        let vecs = |w: f32| EmbeddingVectors {
            dense: vec![w, 0.0],
            sparse: Default::default(),
            dimension: 2,
            provider: "flat".into(),
        };
        let long = "x".repeat(500);
        store
            .upsert(&record("/a.txt", Coverage::Full), &vecs(2.0), Some(&long), None)
            .await
            .unwrap();
        store
            .upsert(&record("/b.bin", Coverage::MetadataOnly), &vecs(1.0), None, None)
            .await
            .unwrap();
        (embedder, store, blobs)
    }

    #[tokio::test]
    async fn previews_are_clipped_and_metadata_hits_kept() {
        let (embedder, store, _) = fixture().await;
        let cfg = QueryConfig {
            preview_chars: 100,
            ..QueryConfig::default()
        };
        let resp = search("anything", &embedder, &store, &cfg).await.unwrap();
        assert_eq!(resp.hits.len(), 2);
        assert_eq!(resp.hits[0].source_id, "/a.txt");
        assert_eq!(resp.hits[0].preview.len(), 100);
        assert!(resp.hits[0].truncated);
        assert_eq!(resp.hits[1].coverage, Coverage::MetadataOnly);
        assert!(resp.hits[1].preview.contains("Location: /b.bin"));
    }

    #[tokio::test]
    async fn response_shrinks_to_byte_limit() {
        let (embedder, store, _) = fixture().await;
        let cfg = QueryConfig {
            preview_chars: 500,
            max_response_bytes: 600,
            ..QueryConfig::default()
        };
        let resp = search("anything", &embedder, &store, &cfg).await.unwrap();
        assert_eq!(resp.hits.len(), 2);
        assert!(resp.encoded_len() <= 600);
        assert!(resp.hits[0].truncated);
    }

    #[tokio::test]
    async fn unreadable_blob_degrades_to_metadata_preview() {
        let (embedder, store, blobs) = fixture().await;
        blobs.set_fail_reads(true);
        let resp = search("anything", &embedder, &store, &QueryConfig::default())
            .await
            .unwrap();
        assert_eq!(resp.hits.len(), 2);
        assert_eq!(resp.hits[0].source_id, "/a.txt");
        assert_eq!(resp.hits[0].coverage, Coverage::Full);
        assert!(resp.hits[0].preview.contains("Location: /a.txt"));
    }
}
