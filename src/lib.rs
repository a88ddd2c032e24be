// src/lib.rs
//! # Tarpaulin course-management API
//!
//! Users, courses, enrollment and avatars behind bearer-token access control.
//!
//! ## Architecture Overview
//! 1. **Auth Layer**: provider key set, credential verification, role and
//!    ownership authorization, resource existence checks
//! 2. **Services Layer**: Axum API server and the identity-provider client
//! 3. **Storage Layer**: record store and avatar object store interfaces with
//!    in-memory backends
//! 4. **Models**: stored kinds and request payloads

pub mod auth;      // Key set, verifier, authorizer, existence guard
pub mod config;    // Startup settings
pub mod error;     // HTTP error responses
pub mod models;    // Data structures
pub mod services;  // Business logic and API
pub mod storage;   // Record and blob storage
