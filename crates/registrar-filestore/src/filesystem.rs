//! Filesystem-backed object store. Files live under `root/bucket/prefix/` and are
//! served from `media_url/bucket/prefix/`.

use crate::{full_path, media_file_url};
use registrar_types::{ObjectStore, ObjectStoreError};
use std::path::PathBuf;

pub struct FileSystemObjectStore {
    root: PathBuf,
    media_url: String,
    bucket: String,
    path_prefix: String,
}

impl FileSystemObjectStore {
    pub fn new(
        root: impl Into<PathBuf>,
        media_url: impl Into<String>,
        bucket: &str,
        path_prefix: &str,
    ) -> Self {
        Self {
            root: root.into(),
            media_url: media_url.into(),
            bucket: bucket.to_string(),
            path_prefix: path_prefix.to_string(),
        }
    }

    fn local_path(&self, path: &str) -> Result<PathBuf, ObjectStoreError> {
        let relative = full_path(&self.path_prefix, path)?;
        Ok(self.root.join(&self.bucket).join(relative))
    }

    fn io_error(&self, description: &str, path: &str, e: std::io::Error) -> ObjectStoreError {
        tracing::error!(
            path = %path,
            bucket = %self.bucket,
            "error while {} file: {}",
            description,
            e
        );
        ObjectStoreError::Io {
            path: path.to_string(),
            message: e.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for FileSystemObjectStore {
    async fn store(&self, path: &str, contents: &[u8]) -> Result<String, ObjectStoreError> {
        let local = self.local_path(path)?;
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error("saving", path, e))?;
        }
        tokio::fs::write(&local, contents)
            .await
            .map_err(|e| self.io_error("saving", path, e))?;
        Ok(self.url(path))
    }

    async fn retrieve(&self, path: &str) -> Result<Option<Vec<u8>>, ObjectStoreError> {
        let local = self.local_path(path)?;
        match tokio::fs::read(&local).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error("reading", path, e)),
        }
    }

    async fn delete(&self, path: &str) -> Result<(), ObjectStoreError> {
        let local = self.local_path(path)?;
        match tokio::fs::remove_file(&local).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error("deleting", path, e)),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, ObjectStoreError> {
        let local = self.local_path(path)?;
        tokio::fs::try_exists(&local)
            .await
            .map_err(|e| self.io_error("checking existence of", path, e))
    }

    fn url(&self, path: &str) -> String {
        media_file_url(&self.media_url, &self.bucket, &self.path_prefix, path)
    }
}
