// src/services/mod.rs
//! HTTP surface and outbound service clients.

pub mod api_server;
pub mod identity_provider;
