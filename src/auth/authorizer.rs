// src/auth/authorizer.rs
//! Role and ownership authorization.
//!
//! An [`AccessPolicy`] is a disjunction of filters over user records, e.g.
//! "role is admin OR the record is users/42". The [`Authorizer`] runs one
//! store query for the whole disjunction and allows the caller iff the
//! verified subject is bound (`sub`) to one of the matching records.
//!
//! # Invariants
//! - A policy with no filters denies every subject.
//! - Nothing is cached: every decision reflects the store at call time, so a
//!   role change applies from the next request on.

use super::verifier::AuthenticatedClaims;
use crate::models::user::{Role, ROLE_FIELD, SUB_FIELD};
use crate::storage::{Datastore, Filter, Key, PropertyFilter, Query, StoreError};
use log::info;
use std::fmt;
use std::sync::Arc;

/// One alternative of an [`AccessPolicy`].
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyFilter {
    /// The user record holds this role
    Role(Role),
    /// The user record is stored under this key
    Key(Key),
}

impl PolicyFilter {
    fn to_property_filter(&self) -> PropertyFilter {
        match self {
            PolicyFilter::Role(role) => PropertyFilter::eq(ROLE_FIELD, role.as_str()),
            PolicyFilter::Key(key) => PropertyFilter::key(key.clone()),
        }
    }
}

impl fmt::Display for PolicyFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyFilter::Role(role) => write!(f, "role={role}"),
            PolicyFilter::Key(key) => write!(f, "__key__={key}"),
        }
    }
}

/// Disjunctive access rule evaluated against stored user records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessPolicy {
    filters: Vec<PolicyFilter>,
}

impl AccessPolicy {
    /// A policy that allows nobody.
    pub fn deny_all() -> Self {
        Self::default()
    }

    /// Only administrators.
    pub fn admin() -> Self {
        Self::default().or_role(Role::Admin)
    }

    /// Only the user stored under `key`.
    pub fn owner(key: Key) -> Self {
        Self::default().or_key(key)
    }

    /// Administrators, or the user stored under `key`.
    pub fn admin_or_owner(key: Key) -> Self {
        Self::admin().or_key(key)
    }

    pub fn or_role(mut self, role: Role) -> Self {
        self.filters.push(PolicyFilter::Role(role));
        self
    }

    pub fn or_key(mut self, key: Key) -> Self {
        self.filters.push(PolicyFilter::Key(key));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    fn to_filter(&self) -> Filter {
        Filter::Or(self.filters.iter().map(PolicyFilter::to_property_filter).collect())
    }
}

impl fmt::Display for AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.filters.is_empty() {
            return f.write_str("<deny all>");
        }
        for (i, filter) in self.filters.iter().enumerate() {
            if i > 0 {
                f.write_str(" OR ")?;
            }
            write!(f, "{filter}")?;
        }
        Ok(())
    }
}

/// Authorization failure.
#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    #[error("subject is not permitted on this resource")]
    Forbidden,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Decides whether a verified subject satisfies an [`AccessPolicy`].
pub struct Authorizer {
    store: Arc<dyn Datastore>,
}

impl Authorizer {
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Authorizer { store }
    }

    /// Allows `claims.sub` iff it is bound to a `kind` record matching `policy`.
    ///
    /// # Errors
    /// - `Forbidden` when no matching record carries the caller's subject,
    ///   including whenever the policy is empty
    /// - `Store` when the query cannot be answered
    pub async fn authorize(
        &self,
        kind: &str,
        policy: &AccessPolicy,
        claims: &AuthenticatedClaims,
    ) -> Result<(), AuthzError> {
        if policy.is_empty() {
            info!("denied {}: empty policy", claims.subject());
            return Err(AuthzError::Forbidden);
        }

        let matching = self
            .store
            .query(Query::new(kind).filter(policy.to_filter()))
            .await?;
        let permitted = matching
            .iter()
            .any(|record| record.get_str(SUB_FIELD) == Some(claims.subject()));

        if permitted {
            Ok(())
        } else {
            info!("denied {} on {kind}: requires {policy}", claims.subject());
            Err(AuthzError::Forbidden)
        }
    }
}
