// src/storage/memory.rs
//! In-process entity store.
//!
//! Keeps every entity in a `HashMap` guarded by `tokio::sync::RwLock`, so
//! handlers can share one store across requests. State is lost on restart;
//! this backend serves local development, tests, and deployments that do not
//! need durability.

use super::{Datastore, Entity, Key, Query, StoreError, StoreResult};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use tokio::sync::RwLock;

/// Entity store backed by process memory.
///
/// Ids are allocated from a single counter shared by all kinds, starting at 1,
/// and are never reused.
#[derive(Debug)]
pub struct MemoryDatastore {
    entities: RwLock<HashMap<Key, Entity>>,
    next_id: AtomicI64,
}

impl Default for MemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatastore {
    pub fn new() -> Self {
        MemoryDatastore {
            entities: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Number of stored entities across all kinds.
    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, AtomicOrdering::SeqCst)
    }

    /// Keeps the allocator ahead of ids written explicitly by callers.
    fn observe_id(&self, id: i64) {
        self.next_id.fetch_max(id + 1, AtomicOrdering::SeqCst);
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn get(&self, key: &Key) -> StoreResult<Option<Entity>> {
        if key.id.is_none() {
            return Err(StoreError::IncompleteKey(key.kind.clone()));
        }
        Ok(self.entities.read().await.get(key).cloned())
    }

    async fn query(&self, query: Query) -> StoreResult<Vec<Entity>> {
        let entities = self.entities.read().await;
        let mut matches: Vec<Entity> = entities
            .values()
            .filter(|entity| entity.key.kind == query.kind)
            .filter(|entity| query.filter.as_ref().map_or(true, |f| f.matches(entity)))
            .cloned()
            .collect();
        drop(entities);

        // Stable base order so paging without an explicit order is deterministic
        matches.sort_by_key(|entity| entity.key.id);
        if let Some(field) = &query.order_by {
            matches.sort_by(|a, b| compare_values(a.get(field), b.get(field)));
        }

        let page = matches.into_iter().skip(query.offset);
        Ok(match query.limit {
            Some(limit) => page.take(limit).collect(),
            None => page.collect(),
        })
    }

    async fn put(&self, mut entity: Entity) -> StoreResult<Entity> {
        match entity.key.id {
            Some(id) => self.observe_id(id),
            None => entity.key.id = Some(self.allocate_id()),
        }
        self.entities
            .write()
            .await
            .insert(entity.key.clone(), entity.clone());
        Ok(entity)
    }

    async fn delete(&self, key: &Key) -> StoreResult<()> {
        self.entities.write().await.remove(key);
        Ok(())
    }
}

/// Orders missing values first, then numbers, then strings; other JSON
/// types compare equal.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::Number(_)), Some(Value::String(_))) => Ordering::Less,
        (Some(Value::String(_)), Some(Value::Number(_))) => Ordering::Greater,
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}
