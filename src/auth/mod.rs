// src/auth/mod.rs
//! Access control for resource routes.
//!
//! A protected request passes three checks in order:
//! 1. [`guard::EntityGuard`]: the targeted record exists (404 otherwise)
//! 2. [`verifier::CredentialVerifier`]: the bearer token is valid (401)
//! 3. [`authorizer::Authorizer`]: the subject satisfies the route policy (403)
//!
//! Routes without a target resource start at step 2.

pub mod authorizer;
pub mod guard;
pub mod key_set;
pub mod verifier;

#[cfg(test)]
pub(crate) mod test_support;
