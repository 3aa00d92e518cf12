use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by the persistence layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("no active user")]
    NoActiveUser,
}

/// Durable client storage, one opaque blob per logical store.
///
/// Implementations only move bytes; what the bytes mean is the caller's
/// business. Keys are short store names such as `"books"` or `"sessions"`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch a blob by key. `None` when the key has never been written.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backing store cannot be read.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Persist a blob under the key, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the blob cannot be stored.
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;
}

/// File-backed blob store keeping one JSON document per key.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl BlobStore for JsonFileStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Connection(e.to_string())),
        }
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let target = self.path_for(key);
        let tmp = self.dir.join(format!("{key}.json.tmp"));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

/// In-memory blob store for tests and prototyping.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let guard = self
            .blobs
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(key).cloned())
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let mut guard = self
            .blobs
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(key.to_owned(), bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryBlobStore::new();
        assert!(store.read("books").await.unwrap().is_none());

        store.write("books", b"[]").await.unwrap();
        assert_eq!(store.read("books").await.unwrap().unwrap(), b"[]");
    }

    #[tokio::test]
    async fn file_store_reports_missing_keys_as_none() {
        let dir = std::env::temp_dir().join(format!("studypact-blob-{}", std::process::id()));
        let store = JsonFileStore::new(&dir);
        assert!(store.read("absent").await.unwrap().is_none());

        store.write("present", b"{\"x\":1}").await.unwrap();
        assert_eq!(store.read("present").await.unwrap().unwrap(), b"{\"x\":1}");

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
