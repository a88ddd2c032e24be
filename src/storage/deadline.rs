// src/storage/deadline.rs
//! Timeout decorators for the entity store and the avatar object store.
//!
//! Wraps any [`Datastore`] or [`BlobStore`] so that every call is bounded by
//! a fixed deadline. A call that does not finish in time fails with
//! [`StoreError::Timeout`] or [`BlobError::Timeout`] instead of holding the
//! request open.

use super::blob_store::{BlobError, BlobStore};
use super::{Datastore, Entity, Key, Query, StoreError, StoreResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// [`Datastore`] that enforces a per-call deadline on an inner store.
pub struct DeadlineDatastore {
    inner: Arc<dyn Datastore>,
    deadline: Duration,
}

impl DeadlineDatastore {
    pub fn new(inner: Arc<dyn Datastore>, deadline: Duration) -> Self {
        DeadlineDatastore { inner, deadline }
    }

    async fn bounded<T>(&self, call: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        tokio::time::timeout(self.deadline, call)
            .await
            .map_err(|_| StoreError::Timeout(self.deadline))?
    }
}

#[async_trait]
impl Datastore for DeadlineDatastore {
    async fn get(&self, key: &Key) -> StoreResult<Option<Entity>> {
        self.bounded(self.inner.get(key)).await
    }

    async fn query(&self, query: Query) -> StoreResult<Vec<Entity>> {
        self.bounded(self.inner.query(query)).await
    }

    async fn put(&self, entity: Entity) -> StoreResult<Entity> {
        self.bounded(self.inner.put(entity)).await
    }

    async fn delete(&self, key: &Key) -> StoreResult<()> {
        self.bounded(self.inner.delete(key)).await
    }
}

/// [`BlobStore`] that enforces a per-call deadline on an inner store.
pub struct DeadlineBlobStore {
    inner: Arc<dyn BlobStore>,
    deadline: Duration,
}

impl DeadlineBlobStore {
    pub fn new(inner: Arc<dyn BlobStore>, deadline: Duration) -> Self {
        DeadlineBlobStore { inner, deadline }
    }

    async fn bounded(
        &self,
        call: impl Future<Output = Result<(), BlobError>>,
    ) -> Result<(), BlobError> {
        tokio::time::timeout(self.deadline, call)
            .await
            .map_err(|_| BlobError::Timeout(self.deadline))?
    }
}

#[async_trait]
impl BlobStore for DeadlineBlobStore {
    async fn upload(
        &self,
        bucket: &str,
        name: &str,
        data: Bytes,
        content_type: Option<String>,
    ) -> Result<(), BlobError> {
        self.bounded(self.inner.upload(bucket, name, data, content_type))
            .await
    }

    async fn delete(&self, bucket: &str, name: &str) -> Result<(), BlobError> {
        self.bounded(self.inner.delete(bucket, name)).await
    }
}
