//! Byte-fetch interface for stored-key credentials (§4.3 step 6). The blob
//! store service itself is an external collaborator out of scope for this
//! crate (§1a); this is the narrow read-only interface the worker needs
//! from it, plus a filesystem-backed adapter reading `BLOB_STORE_DIR` for
//! local/dev use in place of the real service.

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum BlobFetchError {
    #[error("blob {0} not found")]
    NotFound(String),
    #[error("blob fetch failed: {0}")]
    Backend(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, BlobFetchError>;
}

pub struct FilesystemBlobStore {
    root: std::path::PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `BLOB_STORE_DIR` defaults to the current directory; `reference` is
    /// treated as a path relative to it.
    pub fn from_env() -> Self {
        Self::new(std::env::var("BLOB_STORE_DIR").unwrap_or_else(|_| ".".to_string()))
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, BlobFetchError> {
        let path = self.root.join(reference);
        tokio::fs::read(&path).await.map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => BlobFetchError::NotFound(reference.to_string()),
            _ => BlobFetchError::Backend(err.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetches_a_file_relative_to_the_configured_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("prod.pem"), b"-----BEGIN KEY-----\n").unwrap();

        let store = FilesystemBlobStore::new(dir.path());
        let bytes = store.fetch("prod.pem").await.unwrap();
        assert_eq!(bytes, b"-----BEGIN KEY-----\n");
    }

    #[tokio::test]
    async fn missing_reference_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemBlobStore::new(dir.path());
        assert!(matches!(store.fetch("ghost.pem").await, Err(BlobFetchError::NotFound(_))));
    }
}
