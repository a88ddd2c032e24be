// src/auth/guard.rs
//! Resource existence check.
//!
//! Resource-scoped routes resolve their target before authenticating the
//! caller, so a missing resource is reported as not found whatever the
//! credential, and ownership rules only ever run against records that exist.

use crate::storage::{Datastore, Entity, Key, StoreError};
use log::debug;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("{0} not found")]
    NotFound(Key),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Resolves `(kind, id)` to a stored record.
pub struct EntityGuard {
    store: Arc<dyn Datastore>,
}

impl EntityGuard {
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        EntityGuard { store }
    }

    /// Point lookup of `kind/id`.
    ///
    /// # Returns
    /// The stored entity together with its key, for use in ownership policies.
    ///
    /// # Errors
    /// `NotFound` for any absent record, independent of `kind`.
    pub async fn fetch(&self, kind: &str, id: i64) -> Result<(Entity, Key), GuardError> {
        let key = Key::new(kind, id);
        match self.store.get(&key).await? {
            Some(entity) => Ok((entity, key)),
            None => {
                debug!("no entity at {key}");
                Err(GuardError::NotFound(key))
            }
        }
    }
}
