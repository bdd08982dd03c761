//! In-memory object store (process lifetime only).

use crate::{full_path, media_file_url, DEFAULT_MEDIA_URL};
use registrar_types::{ObjectStore, ObjectStoreError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory ObjectStore: full path -> bytes. URLs point at `media_url/bucket/prefix/`,
/// where the API serves job results back out of the store.
pub struct InMemoryObjectStore {
    files: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    media_url: String,
    bucket: String,
    path_prefix: String,
}

impl InMemoryObjectStore {
    pub fn new(bucket: &str, path_prefix: &str) -> Self {
        Self {
            files: Arc::new(RwLock::new(HashMap::new())),
            media_url: DEFAULT_MEDIA_URL.to_string(),
            bucket: bucket.to_string(),
            path_prefix: path_prefix.to_string(),
        }
    }

    pub fn with_media_url(mut self, media_url: impl Into<String>) -> Self {
        self.media_url = media_url.into();
        self
    }

    /// Number of stored files.
    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn store(&self, path: &str, contents: &[u8]) -> Result<String, ObjectStoreError> {
        let key = full_path(&self.path_prefix, path)?;
        self.files.write().await.insert(key, contents.to_vec());
        Ok(self.url(path))
    }

    async fn retrieve(&self, path: &str) -> Result<Option<Vec<u8>>, ObjectStoreError> {
        let key = full_path(&self.path_prefix, path)?;
        Ok(self.files.read().await.get(&key).cloned())
    }

    async fn delete(&self, path: &str) -> Result<(), ObjectStoreError> {
        let key = full_path(&self.path_prefix, path)?;
        self.files.write().await.remove(&key);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, ObjectStoreError> {
        let key = full_path(&self.path_prefix, path)?;
        Ok(self.files.read().await.contains_key(&key))
    }

    fn url(&self, path: &str) -> String {
        media_file_url(&self.media_url, &self.bucket, &self.path_prefix, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_retrieve_and_delete() {
        let store = InMemoryObjectStore::new("registrar", "job-results");
        let url = store.store("j1.json", b"[]").await.unwrap();
        assert_eq!(url, "/media/registrar/job-results/j1.json");
        assert!(store.exists("j1.json").await.unwrap());
        assert_eq!(store.retrieve("j1.json").await.unwrap().as_deref(), Some(&b"[]"[..]));

        store.delete("j1.json").await.unwrap();
        assert!(!store.exists("j1.json").await.unwrap());
        assert_eq!(store.retrieve("j1.json").await.unwrap(), None);
        store.delete("j1.json").await.unwrap();
    }

    #[tokio::test]
    async fn overwrite_keeps_latest_contents() {
        let store = InMemoryObjectStore::new("registrar", "uploads");
        store.store("a.json", b"one").await.unwrap();
        store.store("a.json", b"two").await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(store.retrieve("a.json").await.unwrap().unwrap(), b"two");
    }

    #[tokio::test]
    async fn urls_follow_the_media_url() {
        let store = InMemoryObjectStore::new("registrar", "job-results")
            .with_media_url("https://registrar.example/media/");
        let url = store.store("j1.csv", b"").await.unwrap();
        assert_eq!(url, "https://registrar.example/media/registrar/job-results/j1.csv");
    }
}
