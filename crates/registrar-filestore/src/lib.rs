//! Object store adapter: in-memory and filesystem backends behind [`ObjectStore`].

mod filesystem;
mod memory;

pub use filesystem::FileSystemObjectStore;
pub use memory::InMemoryObjectStore;
pub use registrar_types::{ObjectStore, ObjectStoreError};

use std::sync::Arc;

/// Bucket the registrar keeps its files in.
pub const STORAGE_BUCKET: &str = "registrar";

/// Base URL of stored files when `REGISTRAR_MEDIA_URL` is unset: the API's own `/media` route.
pub const DEFAULT_MEDIA_URL: &str = "/media";

/// Path prefix for job result files.
pub const JOB_RESULTS_PREFIX: &str = "job-results";

/// Path prefix for uploaded enrollment files.
pub const UPLOADS_PREFIX: &str = "uploads";

/// Join `prefix` and `path` with POSIX separators, rejecting paths that escape the prefix.
pub(crate) fn full_path(prefix: &str, path: &str) -> Result<String, ObjectStoreError> {
    if path.is_empty()
        || path.starts_with('/')
        || path.split('/').any(|seg| seg == ".." || seg == ".")
    {
        return Err(ObjectStoreError::InvalidPath(path.to_string()));
    }
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        Ok(path.to_string())
    } else {
        Ok(format!("{}/{}", prefix, path))
    }
}

/// `media_url/bucket/prefix/path`, skipping an empty prefix.
pub(crate) fn media_file_url(media_url: &str, bucket: &str, prefix: &str, path: &str) -> String {
    let base = media_url.trim_end_matches('/');
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{}/{}/{}", base, bucket, path)
    } else {
        format!("{}/{}/{}/{}", base, bucket, prefix, path)
    }
}

/// Build a store for `bucket`/`path_prefix` from the environment.
///
/// `REGISTRAR_STORAGE_BACKEND` selects `memory` (default) or `filesystem`. File URLs start
/// with `REGISTRAR_MEDIA_URL`; the filesystem backend writes under `REGISTRAR_MEDIA_ROOT`.
pub fn filestore_from_env(
    bucket: &str,
    path_prefix: &str,
) -> Result<Arc<dyn ObjectStore>, ObjectStoreError> {
    let backend =
        std::env::var("REGISTRAR_STORAGE_BACKEND").unwrap_or_else(|_| "memory".to_string());
    let media_url =
        std::env::var("REGISTRAR_MEDIA_URL").unwrap_or_else(|_| DEFAULT_MEDIA_URL.to_string());
    match backend.as_str() {
        "memory" => Ok(Arc::new(
            InMemoryObjectStore::new(bucket, path_prefix).with_media_url(media_url),
        )),
        "filesystem" => {
            let root = std::env::var("REGISTRAR_MEDIA_ROOT")
                .unwrap_or_else(|_| "./media".to_string());
            Ok(Arc::new(FileSystemObjectStore::new(
                root,
                media_url,
                bucket,
                path_prefix,
            )))
        }
        other => Err(ObjectStoreError::Config(format!(
            "unsupported storage backend: {}",
            other
        ))),
    }
}
