use crate::error::IndexError;
use crate::models::{EmbeddingVectors, IndexRecord};
use providers::qdrant::{id_string, PointVectors, QdrantClient, QdrantPoint, SparseVector};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub doc_id: String,
    pub score: f32,
    pub record: Option<IndexRecord>,
}

/// Vector side of the hybrid store: one point per document carrying the
/// dense and sparse vectors and the `IndexRecord` payload.
#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    /// Dense dimension of the collection, `None` when it does not exist.
    async fn dimension(&self) -> Result<Option<usize>, IndexError>;

    async fn create(&self, dimension: usize) -> Result<(), IndexError>;

    async fn upsert(&self, record: &IndexRecord, vectors: &EmbeddingVectors)
        -> Result<(), IndexError>;

    async fn delete(&self, doc_ids: &[String]) -> Result<(), IndexError>;

    async fn get(&self, doc_id: &str) -> Result<Option<IndexRecord>, IndexError>;

    /// Every stored record; used for the start-of-run snapshot and cleanup.
    async fn records(&self) -> Result<Vec<IndexRecord>, IndexError>;

    async fn query(
        &self,
        dense: &[f32],
        sparse: &SparseVector,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, IndexError>;
}

pub struct QdrantStore {
    client: QdrantClient,
    prefetch: usize,
}

const SCROLL_PAGE: usize = 256;

impl QdrantStore {
    pub fn new(client: QdrantClient, prefetch: usize) -> Self {
        Self { client, prefetch }
    }

    pub fn client(&self) -> QdrantClient {
        self.client.clone()
    }
}

fn parse_payload(
    id: &serde_json::Value,
    payload: Option<serde_json::Map<String, serde_json::Value>>,
) -> Option<IndexRecord> {
    let payload = payload?;
    match IndexRecord::from_payload(payload) {
        Ok(rec) => Some(rec),
        Err(e) => {
            warn!("point {} has an unreadable payload: {}", id_string(id), e);
            None
        }
    }
}

#[async_trait::async_trait]
impl VectorStore for QdrantStore {
    async fn dimension(&self) -> Result<Option<usize>, IndexError> {
        let info = self.client.collection_info().await?;
        match info {
            None => Ok(None),
            Some(info) => info.dense_dimension.map(Some).ok_or_else(|| {
                IndexError::Configuration(format!(
                    "collection {} has no dense vector named \"dense\"",
                    self.client.collection()
                ))
            }),
        }
    }

    async fn create(&self, dimension: usize) -> Result<(), IndexError> {
        self.client.create_collection(dimension).await?;
        Ok(())
    }

    async fn upsert(
        &self,
        record: &IndexRecord,
        vectors: &EmbeddingVectors,
    ) -> Result<(), IndexError> {
        let point = QdrantPoint {
            id: record.doc_id.clone(),
            vector: PointVectors {
                dense: vectors.dense.clone(),
                sparse: vectors.sparse.clone(),
            },
            payload: record.to_payload(),
        };
        self.client.upsert(vec![point]).await?;
        Ok(())
    }

    async fn delete(&self, doc_ids: &[String]) -> Result<(), IndexError> {
        self.client.delete(doc_ids).await?;
        Ok(())
    }

    async fn get(&self, doc_id: &str) -> Result<Option<IndexRecord>, IndexError> {
        let points = self.client.retrieve(&[doc_id.to_string()]).await?;
        Ok(points
            .into_iter()
            .next()
            .and_then(|p| parse_payload(&p.id, p.payload)))
    }

    async fn records(&self) -> Result<Vec<IndexRecord>, IndexError> {
        let mut out = Vec::new();
        let mut offset = None;
        loop {
            let page = self.client.scroll(offset, SCROLL_PAGE).await?;
            out.extend(
                page.points
                    .into_iter()
                    .filter_map(|p| parse_payload(&p.id, p.payload)),
            );
            match page.next_offset {
                Some(next) if !next.is_null() => offset = Some(next),
                _ => break,
            }
        }
        Ok(out)
    }

    async fn query(
        &self,
        dense: &[f32],
        sparse: &SparseVector,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, IndexError> {
        let hits = self
            .client
            .query_hybrid(dense, sparse, limit, self.prefetch.max(limit))
            .await?;
        Ok(hits
            .into_iter()
            .map(|h| ScoredRecord {
                doc_id: id_string(&h.id),
                score: h.score,
                record: parse_payload(&h.id, h.payload),
            })
            .collect())
    }
}

/// In-process store used by tests and dry runs. Ranks by dense dot product
/// plus sparse overlap.
#[derive(Default)]
pub struct MemoryVectorStore {
    dimension: Mutex<Option<usize>>,
    points: Mutex<BTreeMap<String, (IndexRecord, EmbeddingVectors)>>,
    upserts: AtomicUsize,
    deletes: AtomicUsize,
    fail_upserts: AtomicBool,
}

impl MemoryVectorStore {
    pub fn with_dimension(dimension: usize) -> Self {
        let store = Self::default();
        if let Ok(mut d) = store.dimension.lock() {
            *d = Some(dimension);
        }
        store
    }

    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn set_fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.points.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts a record without vectors, as a foreign writer might.
    pub fn insert_raw(&self, record: IndexRecord) {
        let dim = self.dimension.lock().ok().and_then(|d| *d).unwrap_or(0);
        let vectors = EmbeddingVectors {
            dense: vec![0.0; dim],
            sparse: SparseVector::default(),
            dimension: dim,
            provider: "raw".into(),
        };
        if let Ok(mut points) = self.points.lock() {
            points.insert(record.doc_id.clone(), (record, vectors));
        }
    }

    fn points(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, (IndexRecord, EmbeddingVectors)>>, IndexError>
    {
        self.points
            .lock()
            .map_err(|_| IndexError::TransientProvider("memory vector store poisoned".into()))
    }
}

fn sparse_dot(a: &SparseVector, b: &SparseVector) -> f32 {
    let mut score = 0.0;
    for (i, id) in a.indices.iter().enumerate() {
        if let Ok(j) = b.indices.binary_search(id) {
            score += a.values[i] * b.values[j];
        }
    }
    score
}

#[async_trait::async_trait]
impl VectorStore for MemoryVectorStore {
    async fn dimension(&self) -> Result<Option<usize>, IndexError> {
        Ok(self.dimension.lock().ok().and_then(|d| *d))
    }

    async fn create(&self, dimension: usize) -> Result<(), IndexError> {
        if let Ok(mut d) = self.dimension.lock() {
            *d = Some(dimension);
        }
        Ok(())
    }

    async fn upsert(
        &self,
        record: &IndexRecord,
        vectors: &EmbeddingVectors,
    ) -> Result<(), IndexError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(IndexError::TransientProvider(
                "injected upsert failure".into(),
            ));
        }
        self.points()?
            .insert(record.doc_id.clone(), (record.clone(), vectors.clone()));
        Ok(())
    }

    async fn delete(&self, doc_ids: &[String]) -> Result<(), IndexError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let mut points = self.points()?;
        for id in doc_ids {
            points.remove(id);
        }
        Ok(())
    }

    async fn get(&self, doc_id: &str) -> Result<Option<IndexRecord>, IndexError> {
        Ok(self.points()?.get(doc_id).map(|(r, _)| r.clone()))
    }

    async fn records(&self) -> Result<Vec<IndexRecord>, IndexError> {
        Ok(self.points()?.values().map(|(r, _)| r.clone()).collect())
    }

    async fn query(
        &self,
        dense: &[f32],
        sparse: &SparseVector,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, IndexError> {
        let points = self.points()?;
        let mut scored: Vec<ScoredRecord> = points
            .values()
            .map(|(rec, vecs)| {
                let dense_score: f32 = vecs.dense.iter().zip(dense).map(|(a, b)| a * b).sum();
                ScoredRecord {
                    doc_id: rec.doc_id.clone(),
                    score: dense_score + sparse_dot(sparse, &vecs.sparse),
                    record: Some(rec.clone()),
                }
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.doc_id.cmp(&b.doc_id)));
        scored.truncate(limit);
        Ok(scored)
    }
}
