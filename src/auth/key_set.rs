// src/auth/key_set.rs
//! Identity-provider signing keys.
//!
//! Fetches the provider's published key set from its well-known JWKS endpoint
//! and hands individual entries to the credential verifier.
//!
//! # Freshness
//! By default every lookup performs a live fetch, so a key rotated out by the
//! provider stops verifying immediately. A short TTL can be configured to
//! reuse the last fetch; a key identifier missing from the cached set always
//! falls through to a fresh fetch, so newly rotated-in keys are never missed.
//!
//! # Concurrency
//! Concurrent requests may fetch redundantly. Fetching is idempotent, so the
//! cache only guards its own slot and never serializes network calls.

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// A public signing key published by the identity provider.
///
/// Only the RSA parameters are modelled; any extra members in the JWKS entry
/// are ignored.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KeySetEntry {
    /// Key type, e.g. `RSA`
    pub kty: String,
    /// Key identifier referenced by the token header's `kid`
    pub kid: String,
    /// Intended usage, normally `sig`
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// Base64url-encoded RSA modulus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// Base64url-encoded RSA public exponent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

/// The entries of one key-set fetch, unique by key identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySet {
    entries: Vec<KeySetEntry>,
}

impl KeySet {
    /// Builds a key set, keeping the first entry for any repeated `kid`.
    pub fn from_entries(entries: impl IntoIterator<Item = KeySetEntry>) -> Self {
        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        for entry in entries {
            if seen.insert(entry.kid.clone()) {
                unique.push(entry);
            } else {
                warn!("key set repeats kid {}; keeping the first entry", entry.kid);
            }
        }
        KeySet { entries: unique }
    }

    /// Parses a JWKS document (`{"keys": [...]}`).
    ///
    /// Entries that lack the required members are skipped rather than failing
    /// the whole fetch; a document without a `keys` array is malformed.
    pub fn from_document(document: &[u8]) -> Result<Self, KeySetError> {
        let document: KeySetDocument = serde_json::from_slice(document)
            .map_err(|err| KeySetError::Malformed(err.to_string()))?;
        let entries = document.keys.into_iter().filter_map(|raw| {
            match serde_json::from_value::<KeySetEntry>(raw) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    debug!("skipping unusable key set entry: {err}");
                    None
                }
            }
        });
        Ok(Self::from_entries(entries))
    }

    pub fn find(&self, kid: &str) -> Option<&KeySetEntry> {
        self.entries.iter().find(|entry| entry.kid == kid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Deserialize)]
struct KeySetDocument {
    keys: Vec<Value>,
}

/// The key set could not be retrieved: network failure, timeout, non-success
/// status, or an unparseable document.
#[derive(Debug, thiserror::Error)]
pub enum KeySetError {
    #[error("key set request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("key set endpoint returned {0}")]
    Status(reqwest::StatusCode),
    #[error("key set document is malformed: {0}")]
    Malformed(String),
}

/// Source of identity-provider signing keys.
///
/// The verifier depends on this trait rather than on HTTP directly so tests
/// can supply fixed keys.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Retrieves the provider's current key set.
    async fn fetch_keys(&self) -> Result<KeySet, KeySetError>;

    /// Finds the entry for `kid` in the current key set.
    async fn find_key(&self, kid: &str) -> Result<Option<KeySetEntry>, KeySetError> {
        Ok(self.fetch_keys().await?.find(kid).cloned())
    }
}

struct CachedKeySet {
    keys: KeySet,
    fetched_at: Instant,
}

/// [`KeySource`] backed by the provider's JWKS endpoint.
pub struct KeySetCache {
    client: reqwest::Client,
    jwks_url: String,
    ttl: Duration,
    cached: RwLock<Option<CachedKeySet>>,
}

impl KeySetCache {
    /// Creates a cache for `jwks_url`.
    ///
    /// # Arguments
    /// * `client` - HTTP client; its configured timeout bounds every fetch
    /// * `jwks_url` - Full URL of the provider's `/.well-known/jwks.json`
    /// * `ttl` - How long a fetch may be reused; `Duration::ZERO` disables reuse.
    ///   Must stay below the provider's key-rotation window.
    pub fn new(client: reqwest::Client, jwks_url: impl Into<String>, ttl: Duration) -> Self {
        KeySetCache {
            client,
            jwks_url: jwks_url.into(),
            ttl,
            cached: RwLock::new(None),
        }
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    async fn cached_entry(&self, kid: &str) -> Option<KeySetEntry> {
        if self.ttl.is_zero() {
            return None;
        }
        let cached = self.cached.read().await;
        cached
            .as_ref()
            .filter(|slot| slot.fetched_at.elapsed() < self.ttl)
            .and_then(|slot| slot.keys.find(kid).cloned())
    }
}

#[async_trait]
impl KeySource for KeySetCache {
    async fn fetch_keys(&self) -> Result<KeySet, KeySetError> {
        debug!("fetching key set from {}", self.jwks_url);
        let response = self.client.get(&self.jwks_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(KeySetError::Status(status));
        }
        let body = response.bytes().await?;
        let keys = KeySet::from_document(&body)?;

        if !self.ttl.is_zero() {
            *self.cached.write().await = Some(CachedKeySet {
                keys: keys.clone(),
                fetched_at: Instant::now(),
            });
        }
        Ok(keys)
    }

    async fn find_key(&self, kid: &str) -> Result<Option<KeySetEntry>, KeySetError> {
        if let Some(entry) = self.cached_entry(kid).await {
            return Ok(Some(entry));
        }
        Ok(self.fetch_keys().await?.find(kid).cloned())
    }
}
