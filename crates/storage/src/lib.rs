//! Blob storage for full extracted text.
//!
//! One object per document, keyed `<docId>.txt`. Backends: local directory,
//! Azure Blob container (SAS URL) and an in-memory store for tests.

use thiserror::Error;

pub mod azure;
pub mod fs;
pub mod memory;

pub use azure::{AzureBlobConfig, AzureBlobStore};
pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("io error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("blob request failed (status {status}): {body}")]
    Status { status: u16, body: String },
    #[error("blob transport error: {0}")]
    Transport(String),
    #[error("invalid blob key: {0}")]
    InvalidKey(String),
    #[error("malformed listing: {0}")]
    Listing(String),
    #[error("blob store misconfigured: {0}")]
    Config(String),
}

impl BlobError {
    pub fn is_transient(&self) -> bool {
        match self {
            BlobError::Status { status, .. } => *status == 429 || *status >= 500,
            BlobError::Transport(_) => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for BlobError {
    fn from(err: reqwest::Error) -> Self {
        BlobError::Transport(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Written,
    /// Stored bytes already had the same content hash.
    Unchanged,
}

/// Hex blake3 digest used to make uploads idempotent.
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Keys are flat object names: no separators, no traversal.
pub fn validate_key(key: &str) -> Result<(), BlobError> {
    if key.is_empty()
        || key.contains('/')
        || key.contains('\\')
        || key.starts_with('.')
        || key.contains("..")
    {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    fn name(&self) -> &str;

    /// Writes `bytes` under `key`, skipping the upload when the stored
    /// object already carries the same content hash.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<PutOutcome, BlobError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError>;

    /// Removes `key`. Deleting a missing object is not an error; returns
    /// whether something was removed.
    async fn delete(&self, key: &str) -> Result<bool, BlobError>;

    /// Content hash of the stored object, `None` when absent.
    async fn content_hash(&self, key: &str) -> Result<Option<String>, BlobError>;

    async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        Ok(self.content_hash(key).await?.is_some())
    }

    async fn list_keys(&self) -> Result<Vec<String>, BlobError>;
}
