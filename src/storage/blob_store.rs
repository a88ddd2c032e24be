// src/storage/blob_store.rs
//! Object storage for user avatars.
//!
//! Avatars are opaque blobs addressed by `(bucket, name)`. The API only needs
//! to upload and delete them; serving the bytes is left to the object-storage
//! service itself.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// Failures raised by a [`BlobStore`].
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("object store unavailable: {0}")]
    Unavailable(String),
    #[error("object store call exceeded {0:?}")]
    Timeout(Duration),
}

/// Minimal object-store interface used by the avatar routes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `data` under `name`, replacing any existing object.
    async fn upload(
        &self,
        bucket: &str,
        name: &str,
        data: Bytes,
        content_type: Option<String>,
    ) -> Result<(), BlobError>;

    /// Deletes `name`; deleting a missing object is not an error.
    async fn delete(&self, bucket: &str, name: &str) -> Result<(), BlobError>;
}

/// A stored object and its declared content type.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub data: Bytes,
    pub content_type: Option<String>,
}

/// In-process [`BlobStore`] keyed by `bucket/name`.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, StoredBlob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the stored object, if any.
    #[cfg(test)]
    pub async fn fetch(&self, bucket: &str, name: &str) -> Option<StoredBlob> {
        self.objects
            .read()
            .await
            .get(&object_path(bucket, name))
            .cloned()
    }
}

fn object_path(bucket: &str, name: &str) -> String {
    format!("{bucket}/{name}")
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        bucket: &str,
        name: &str,
        data: Bytes,
        content_type: Option<String>,
    ) -> Result<(), BlobError> {
        self.objects
            .write()
            .await
            .insert(object_path(bucket, name), StoredBlob { data, content_type });
        Ok(())
    }

    async fn delete(&self, bucket: &str, name: &str) -> Result<(), BlobError> {
        self.objects.write().await.remove(&object_path(bucket, name));
        Ok(())
    }
}
