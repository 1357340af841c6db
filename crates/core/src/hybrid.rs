//! Vector entry plus full-text blob, linked by docId.
//!
//! Writes go blob first, then vector; deletes go vector first, then blob.
//! A crash between the two steps leaves at most an orphan blob, which the
//! cleanup sweep removes.

use crate::error::IndexError;
use crate::models::{blob_key, Coverage, EmbeddingVectors, IndexRecord};
use crate::vectorstore::{ScoredRecord, VectorStore};
use providers::qdrant::SparseVector;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use storage::{BlobStore, PutOutcome};
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct HybridStore {
    vectors: Arc<dyn VectorStore>,
    blobs: Arc<dyn BlobStore>,
    timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrphanReport {
    pub blobs_removed: Vec<String>,
    pub vectors_removed: Vec<String>,
}

impl OrphanReport {
    pub fn total(&self) -> usize {
        self.blobs_removed.len() + self.vectors_removed.len()
    }
}

impl HybridStore {
    pub fn new(vectors: Arc<dyn VectorStore>, blobs: Arc<dyn BlobStore>, timeout: Duration) -> Self {
        Self {
            vectors,
            blobs,
            timeout,
        }
    }

    pub fn vectors(&self) -> &Arc<dyn VectorStore> {
        &self.vectors
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T, IndexError>
    where
        F: std::future::Future<Output = Result<T, IndexError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(IndexError::TransientProvider(format!(
                "{} timed out after {:?}",
                what, self.timeout
            ))),
        }
    }

    /// Stores one document. `full_text` is `Some` for full coverage.
    /// `previous` is the record being superseded, if any.
    pub async fn upsert(
        &self,
        record: &IndexRecord,
        vectors: &EmbeddingVectors,
        full_text: Option<&str>,
        previous: Option<&IndexRecord>,
    ) -> Result<(), IndexError> {
        let key = blob_key(&record.doc_id);
        let mut rollback: Option<Option<Vec<u8>>> = None;
        if let Some(text) = full_text {
            // The superseded record keeps pointing at this key until the
            // vector upsert lands, so its bytes are kept for restoring.
            let prior = match previous {
                Some(_) => self
                    .bounded("blob read", async {
                        self.blobs.get(&key).await.map_err(IndexError::from)
                    })
                    .await?,
                None => None,
            };
            let outcome = self
                .bounded("blob write", async {
                    self.blobs
                        .put(&key, text.as_bytes())
                        .await
                        .map_err(IndexError::from)
                })
                .await?;
            if outcome == PutOutcome::Unchanged {
                debug!("blob {} already current", key);
            } else {
                rollback = Some(prior);
            }
        }

        if let Err(e) = self
            .bounded("vector upsert", self.vectors.upsert(record, vectors))
            .await
        {
            if let Some(prior) = rollback {
                self.restore_blob(&key, prior).await;
            }
            return Err(e);
        }

        let had_blob = previous.map(|p| p.coverage == Coverage::Full).unwrap_or(false);
        if full_text.is_none() && had_blob {
            // Downgraded to metadata-only; the old text is stale.
            if let Err(e) = self
                .bounded("blob delete", async {
                    self.blobs.delete(&key).await.map_err(IndexError::from)
                })
                .await
            {
                warn!("stale blob {} left for cleanup: {}", key, e);
            }
        }
        Ok(())
    }

    /// Puts back the blob a failed upsert overwrote, or drops the new one
    /// when there was nothing before it.
    async fn restore_blob(&self, key: &str, prior: Option<Vec<u8>>) {
        let restored = match prior {
            Some(bytes) => {
                self.bounded("blob restore", async {
                    self.blobs
                        .put(key, &bytes)
                        .await
                        .map(|_| ())
                        .map_err(IndexError::from)
                })
                .await
            }
            None => {
                self.bounded("blob delete", async {
                    self.blobs
                        .delete(key)
                        .await
                        .map(|_| ())
                        .map_err(IndexError::from)
                })
                .await
            }
        };
        if let Err(e) = restored {
            warn!("blob {} not rolled back: {}", key, e);
        }
    }

    /// Removes a document: vector entry first, then its blob.
    pub async fn remove(&self, doc_id: &str) -> Result<(), IndexError> {
        self.bounded("vector delete", self.vectors.delete(&[doc_id.to_string()]))
            .await?;
        let key = blob_key(doc_id);
        self.bounded("blob delete", async { self.blobs.delete(&key).await.map_err(IndexError::from) })
            .await?;
        Ok(())
    }

    pub async fn fetch(&self, doc_id: &str) -> Result<Option<String>, IndexError> {
        let key = blob_key(doc_id);
        let bytes = self
            .bounded("blob read", async { self.blobs.get(&key).await.map_err(IndexError::from) })
            .await?;
        Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    pub async fn query(
        &self,
        dense: &[f32],
        sparse: &SparseVector,
        k: usize,
    ) -> Result<Vec<ScoredRecord>, IndexError> {
        self.bounded("vector query", self.vectors.query(dense, sparse, k))
            .await
    }

    /// Deletes blobs no full-coverage record references and full-coverage
    /// vectors whose blob is missing.
    pub async fn reconcile_orphans(&self) -> Result<OrphanReport, IndexError> {
        let records = self.vectors.records().await?;
        let keys: HashSet<String> = self.blobs.list_keys().await?.into_iter().collect();
        let referenced: HashSet<String> = records
            .iter()
            .filter(|r| r.coverage == Coverage::Full)
            .map(|r| r.blob_key())
            .collect();

        let mut report = OrphanReport::default();

        let broken: Vec<String> = records
            .iter()
            .filter(|r| r.coverage == Coverage::Full && !keys.contains(&r.blob_key()))
            .map(|r| r.doc_id.clone())
            .collect();
        for doc_id in broken {
            let err = IndexError::StorageInconsistency(format!(
                "vector {} has no blob",
                doc_id
            ));
            warn!("{}; removing vector", err);
            self.vectors.delete(&[doc_id.clone()]).await?;
            report.vectors_removed.push(doc_id);
        }

        let mut stray: Vec<&String> = keys.iter().filter(|k| !referenced.contains(*k)).collect();
        stray.sort();
        for key in stray {
            let err = IndexError::StorageInconsistency(format!("blob {} has no vector", key));
            warn!("{}; removing blob", err);
            self.blobs.delete(key).await?;
            report.blobs_removed.push(key.clone());
        }

        if report.total() > 0 {
            info!(
                "Removed {} orphan blobs and {} orphan vectors",
                report.blobs_removed.len(),
                report.vectors_removed.len()
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{doc_id, ExtractionMethod};
    use crate::vectorstore::MemoryVectorStore;
    use chrono::Utc;
    use storage::MemoryBlobStore;

    fn record(source: &str, coverage: Coverage) -> IndexRecord {
        IndexRecord {
            doc_id: doc_id(source),
            source_id: source.into(),
            file_name: source.trim_start_matches('/').into(),
            file_type: "txt".into(),
            size_bytes: 5,
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

    fn vectors() -> EmbeddingVectors {
        EmbeddingVectors {
            dense: vec![1.0, 0.0],
            sparse: SparseVector::default(),
            dimension: 2,
            provider: "test".into(),
        }
    }

    fn store() -> (HybridStore, Arc<MemoryVectorStore>, Arc<MemoryBlobStore>) {
        let v = Arc::new(MemoryVectorStore::with_dimension(2));
        let b = Arc::new(MemoryBlobStore::new());
        (
            HybridStore::new(v.clone(), b.clone(), Duration::from_secs(5)),
            v,
            b,
        )
    }

    #[tokio::test]
    async fn failed_blob_write_leaves_no_vector() {
        let (hybrid, v, b) = store();
        b.set_fail_writes(true);
        let rec = record("/a.txt", Coverage::Full);
        assert!(hybrid.upsert(&rec, &vectors(), Some("hello"), None).await.is_err());
        assert_eq!(v.upsert_calls(), 0);
        assert!(v.is_empty());
    }

    #[tokio::test]
    async fn downgrade_to_metadata_only_drops_blob() {
        let (hybrid, _v, b) = store();
        let full = record("/a.txt", Coverage::Full);
        hybrid.upsert(&full, &vectors(), Some("hello"), None).await.unwrap();
        assert_eq!(hybrid.fetch(&full.doc_id).await.unwrap().as_deref(), Some("hello"));

        let meta = record("/a.txt", Coverage::MetadataOnly);
        hybrid.upsert(&meta, &vectors(), None, Some(&full)).await.unwrap();
        assert!(b.is_empty());
    }

    #[tokio::test]
    async fn remove_deletes_both_sides() {
        let (hybrid, v, b) = store();
        let rec = record("/a.txt", Coverage::Full);
        hybrid.upsert(&rec, &vectors(), Some("hello"), None).await.unwrap();
        hybrid.remove(&rec.doc_id).await.unwrap();
        assert!(v.is_empty());
        assert!(b.is_empty());
    }

    #[tokio::test]
    async fn reconcile_removes_both_kinds_of_orphan() {
        let (hybrid, v, b) = store();
        let kept = record("/kept.txt", Coverage::Full);
        hybrid.upsert(&kept, &vectors(), Some("kept"), None).await.unwrap();
        let meta = record("/meta.pub", Coverage::MetadataOnly);
        hybrid.upsert(&meta, &vectors(), None, None).await.unwrap();

        b.put("stray.txt", b"x").await.unwrap();
        let broken = record("/broken.txt", Coverage::Full);
        v.insert_raw(broken.clone());

        let report = hybrid.reconcile_orphans().await.unwrap();
        assert_eq!(report.blobs_removed, vec!["stray.txt"]);
        assert_eq!(report.vectors_removed, vec![broken.doc_id.clone()]);
        assert_eq!(v.len(), 2);
        assert_eq!(b.list_keys().await.unwrap(), vec![kept.blob_key()]);
    }

    #[tokio::test]
    async fn reconcile_reclaims_blob_under_metadata_only_record() {
        let (hybrid, v, b) = store();
        let meta = record("/scan.pdf", Coverage::MetadataOnly);
        hybrid.upsert(&meta, &vectors(), None, None).await.unwrap();
        // Left behind by a downgrade whose delete failed.
        b.put(&meta.blob_key(), b"old text").await.unwrap();

        let report = hybrid.reconcile_orphans().await.unwrap();
        assert_eq!(report.blobs_removed, vec![meta.blob_key()]);
        assert!(report.vectors_removed.is_empty());
        assert_eq!(v.len(), 1);
        assert!(b.is_empty());
    }

    #[tokio::test]
    async fn failed_vector_upsert_restores_previous_blob() {
        let (hybrid, v, b) = store();
        let old = record("/a.txt", Coverage::Full);
        hybrid.upsert(&old, &vectors(), Some("first"), None).await.unwrap();

        v.set_fail_upserts(true);
        let new = record("/a.txt", Coverage::Full);
        assert!(hybrid
            .upsert(&new, &vectors(), Some("second"), Some(&old))
            .await
            .is_err());
        assert_eq!(hybrid.fetch(&old.doc_id).await.unwrap().as_deref(), Some("first"));
        assert_eq!(b.len(), 1);
    }

    #[tokio::test]
    async fn failed_first_upsert_leaves_no_blob() {
        let (hybrid, v, b) = store();
        v.set_fail_upserts(true);
        let rec = record("/a.txt", Coverage::Full);
        assert!(hybrid.upsert(&rec, &vectors(), Some("hello"), None).await.is_err());
        assert!(b.is_empty());
    }
}
