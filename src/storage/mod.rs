// src/storage/mod.rs
//! Storage collaborators for the course API.
//!
//! The service treats its primary store as a keyed document store with
//! query-by-filter, and its avatar storage as a flat object store. Both are
//! traits so the access-control core can be exercised against in-process
//! doubles, and a hosted backend can be swapped in at startup.
//!
//! - [`Datastore`]: entities addressed by `(kind, id)` with OR-filter queries
//! - [`blob_store::BlobStore`]: avatar blobs addressed by `(bucket, name)`

pub mod blob_store;
pub mod deadline;
pub mod memory;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;

/// Reserved property name that matches against an entity's key.
pub const KEY_FIELD: &str = "__key__";

/// Result alias for entity store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures raised by a [`Datastore`] implementation.
///
/// None of these are attributable to the caller; the API boundary renders
/// them as a service-unavailable response.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store call exceeded {0:?}")]
    Timeout(std::time::Duration),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("incomplete key for kind {0}")]
    IncompleteKey(String),
}

/// Stable address of a stored entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    pub kind: String,
    /// `None` until the store allocates an id on first `put`.
    pub id: Option<i64>,
}

impl Key {
    /// Builds a complete key for an existing entity.
    pub fn new(kind: &str, id: i64) -> Self {
        Key {
            kind: kind.to_string(),
            id: Some(id),
        }
    }

    /// Builds a key whose id will be allocated by the store.
    pub fn incomplete(kind: &str) -> Self {
        Key {
            kind: kind.to_string(),
            id: None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{}/{}", self.kind, id),
            None => write!(f, "{}/<new>", self.kind),
        }
    }
}

/// A stored record: its key plus arbitrary named properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub key: Key,
    pub properties: Map<String, Value>,
}

impl Entity {
    pub fn new(key: Key) -> Self {
        Entity {
            key,
            properties: Map::new(),
        }
    }

    /// Allocated id, or `0` for an entity that was never stored.
    pub fn id(&self) -> i64 {
        self.key.id.unwrap_or_default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.properties.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.properties.insert(field.to_string(), value.into());
    }

    /// Copies the properties into a JSON object suitable for responses.
    pub fn to_json(&self) -> Map<String, Value> {
        self.properties.clone()
    }
}

/// Right-hand side of an equality filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Value(Value),
    Key(Key),
}

/// A single `field = value` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyFilter {
    pub field: String,
    pub value: FilterValue,
}

impl PropertyFilter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        PropertyFilter {
            field: field.to_string(),
            value: FilterValue::Value(value.into()),
        }
    }

    /// Matches exactly the entity stored under `key`.
    pub fn key(key: Key) -> Self {
        PropertyFilter {
            field: KEY_FIELD.to_string(),
            value: FilterValue::Key(key),
        }
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        match (&self.value, self.field.as_str()) {
            (FilterValue::Key(key), KEY_FIELD) => &entity.key == key,
            (FilterValue::Key(_), _) => false,
            (FilterValue::Value(expected), field) => entity.get(field) == Some(expected),
        }
    }
}

/// Filter attached to a [`Query`].
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Property(PropertyFilter),
    /// Matches entities satisfying at least one member; empty matches nothing.
    Or(Vec<PropertyFilter>),
}

impl Filter {
    pub fn matches(&self, entity: &Entity) -> bool {
        match self {
            Filter::Property(filter) => filter.matches(entity),
            Filter::Or(filters) => filters.iter().any(|filter| filter.matches(entity)),
        }
    }
}

/// Query against one kind, with optional filter, ordering and paging.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub kind: String,
    pub filter: Option<Filter>,
    pub order_by: Option<String>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(kind: &str) -> Self {
        Query {
            kind: kind.to_string(),
            filter: None,
            order_by: None,
            offset: 0,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn order_by(mut self, field: &str) -> Self {
        self.order_by = Some(field.to_string());
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }
}

/// Keyed document store consumed by the API and the access-control core.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Point lookup by complete key.
    async fn get(&self, key: &Key) -> StoreResult<Option<Entity>>;

    /// Returns every entity of `query.kind` that matches the query filter.
    async fn query(&self, query: Query) -> StoreResult<Vec<Entity>>;

    /// Inserts or replaces an entity, allocating an id for incomplete keys.
    async fn put(&self, entity: Entity) -> StoreResult<Entity>;

    /// Removes an entity; removing a missing key is not an error.
    async fn delete(&self, key: &Key) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(id: i64, role: &str) -> Entity {
        let mut entity = Entity::new(Key::new("users", id));
        entity.set("role", role);
        entity
    }

    #[test]
    fn key_filter_only_matches_its_own_entity() {
        let filter = PropertyFilter::key(Key::new("users", 7));
        assert!(filter.matches(&user(7, "student")));
        assert!(!filter.matches(&user(8, "student")));
        // Same id under another kind is a different entity
        let mut course = Entity::new(Key::new("courses", 7));
        course.set("role", "student");
        assert!(!filter.matches(&course));
    }

    #[test]
    fn or_filter_matches_any_member() {
        let filter = Filter::Or(vec![
            PropertyFilter::eq("role", "admin"),
            PropertyFilter::key(Key::new("users", 3)),
        ]);
        assert!(filter.matches(&user(1, "admin")));
        assert!(filter.matches(&user(3, "student")));
        assert!(!filter.matches(&user(4, "instructor")));
    }

    #[test]
    fn empty_or_filter_matches_nothing() {
        let filter = Filter::Or(Vec::new());
        assert!(!filter.matches(&user(1, "admin")));
    }

    #[test]
    fn value_filter_compares_json_values() {
        let mut course = Entity::new(Key::new("courses", 1));
        course.set("instructor_id", 5);
        assert!(PropertyFilter::eq("instructor_id", json!(5)).matches(&course));
        assert!(!PropertyFilter::eq("instructor_id", json!("5")).matches(&course));
    }
}
