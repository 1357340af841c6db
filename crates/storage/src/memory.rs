use crate::{content_hash, validate_key, BlobError, BlobStore, PutOutcome};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// In-process blob store. Reads and writes can be made to fail for
/// exercising partial-failure paths.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>, BlobError> {
        self.blobs
            .lock()
            .map_err(|_| BlobError::Config("memory store poisoned".into()))
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<PutOutcome, BlobError> {
        validate_key(key)?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BlobError::Status {
                status: 500,
                body: "injected write failure".into(),
            });
        }
        let mut blobs = self.lock()?;
        if blobs.get(key).map(|b| b.as_slice()) == Some(bytes) {
            return Ok(PutOutcome::Unchanged);
        }
        blobs.insert(key.to_string(), bytes.to_vec());
        Ok(PutOutcome::Written)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BlobError::Status {
                status: 503,
                body: "injected read failure".into(),
            });
        }
        Ok(self.lock()?.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<bool, BlobError> {
        Ok(self.lock()?.remove(key).is_some())
    }

    async fn content_hash(&self, key: &str) -> Result<Option<String>, BlobError> {
        Ok(self.lock()?.get(key).map(|b| content_hash(b)))
    }

    async fn list_keys(&self) -> Result<Vec<String>, BlobError> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn injected_failures_leave_store_untouched() {
        let store = MemoryBlobStore::new();
        store.put("a.txt", b"one").await.unwrap();
        store.set_fail_writes(true);
        assert!(store.put("a.txt", b"two").await.is_err());
        assert_eq!(store.get("a.txt").await.unwrap().unwrap(), b"one");
        store.set_fail_writes(false);
        assert_eq!(store.put("a.txt", b"one").await.unwrap(), PutOutcome::Unchanged);
        assert_eq!(store.len(), 1);
    }
}
