use crate::{content_hash, validate_key, BlobError, BlobStore, PutOutcome};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

const TMP_SUFFIX: &str = ".partial";

/// Blobs as plain files under one directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, BlobError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| BlobError::Io {
                key: root.display().to_string(),
                source,
            })?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

fn io_err(key: &str) -> impl FnOnce(std::io::Error) -> BlobError + '_ {
    move |source| BlobError::Io {
        key: key.to_string(),
        source,
    }
}

#[async_trait::async_trait]
impl BlobStore for FsBlobStore {
    fn name(&self) -> &str {
        "fs"
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<PutOutcome, BlobError> {
        let path = self.path_for(key)?;
        if let Some(existing) = self.content_hash(key).await? {
            if existing == content_hash(bytes) {
                debug!("blob {} unchanged", key);
                return Ok(PutOutcome::Unchanged);
            }
        }
        let tmp = self.root.join(format!("{}{}", key, TMP_SUFFIX));
        tokio::fs::write(&tmp, bytes).await.map_err(io_err(key))?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err(key))?;
        Ok(PutOutcome::Written)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(key)(e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, BlobError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(key)(e)),
        }
    }

    async fn content_hash(&self, key: &str) -> Result<Option<String>, BlobError> {
        Ok(self.get(key).await?.map(|bytes| content_hash(&bytes)))
    }

    async fn list_keys(&self) -> Result<Vec<String>, BlobError> {
        let root_key = self.root.display().to_string();
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(io_err(&root_key))?;
        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(io_err(&root_key))? {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(TMP_SUFFIX) || name.starts_with('.') {
                continue;
            }
            keys.push(name);
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(tmp.path().join("blobs")).await.unwrap();

        assert_eq!(store.put("a.txt", b"hello").await.unwrap(), PutOutcome::Written);
        assert_eq!(store.put("a.txt", b"hello").await.unwrap(), PutOutcome::Unchanged);
        assert_eq!(store.put("a.txt", b"hello2").await.unwrap(), PutOutcome::Written);
        assert_eq!(store.get("a.txt").await.unwrap().unwrap(), b"hello2");
        assert!(store.exists("a.txt").await.unwrap());

        assert!(store.delete("a.txt").await.unwrap());
        assert!(!store.delete("a.txt").await.unwrap());
        assert!(store.get("a.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_ignores_partials_and_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(tmp.path()).await.unwrap();
        store.put("b.txt", b"x").await.unwrap();
        store.put("a.txt", b"y").await.unwrap();
        std::fs::write(tmp.path().join("c.txt.partial"), b"z").unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        assert_eq!(store.list_keys().await.unwrap(), vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(tmp.path()).await.unwrap();
        assert!(matches!(
            store.put("../x.txt", b"x").await,
            Err(BlobError::InvalidKey(_))
        ));
    }
}
