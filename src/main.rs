// src/main.rs

//! # Tarpaulin API - Main Entry Point
//!
//! Loads settings, wires the access-control components to their backends and
//! starts the API server. See [`tarpaulin_api::config`] for the environment
//! variables read at startup.

use anyhow::Context;
use dotenv::dotenv;
use env_logger::Env;
use log::info;
use std::sync::Arc;
use tarpaulin_api::auth::key_set::KeySetCache;
use tarpaulin_api::auth::verifier::{CredentialVerifier, VerifierConfig};
use tarpaulin_api::config::Settings;
use tarpaulin_api::services::api_server::{ApiServer, ServerOptions};
use tarpaulin_api::services::identity_provider::IdentityProviderClient;
use tarpaulin_api::storage::blob_store::MemoryBlobStore;
use tarpaulin_api::storage::deadline::{DeadlineBlobStore, DeadlineDatastore};
use tarpaulin_api::storage::memory::MemoryDatastore;

/// Main application entry point
///
/// # Initialization Sequence
/// 1. Load environment configuration
/// 2. Build the shared HTTP client and the provider key-set source
/// 3. Initialize storage backends
/// 4. Start API server
///
/// # Errors
/// - If required environment variables are missing or invalid
/// - If the listen address cannot be bound
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let settings = Settings::load().context("loading settings")?;
    let timeout = settings.upstream_timeout();

    // One client for every outbound call; its timeout bounds each of them
    let http = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("building HTTP client")?;

    let keys = KeySetCache::new(http.clone(), settings.jwks_url(), settings.jwks_cache_ttl());
    info!("verifying credentials against {}", keys.jwks_url());
    let verifier = CredentialVerifier::new(
        Arc::new(keys),
        VerifierConfig {
            issuer: settings.issuer(),
            audience: settings.auth0_client_id.clone(),
            algorithms: settings.algorithms()?,
            leeway_secs: settings.clock_skew_secs,
        },
    );
    let identity_provider = IdentityProviderClient::new(
        http,
        settings.token_url(),
        settings.auth0_client_id.clone(),
        settings.auth0_client_secret.clone(),
    );

    let store = DeadlineDatastore::new(Arc::new(MemoryDatastore::new()), timeout);
    let blobs = DeadlineBlobStore::new(Arc::new(MemoryBlobStore::new()), timeout);

    let api_server = ApiServer::new(
        Arc::new(store),
        Arc::new(blobs),
        verifier,
        identity_provider,
        ServerOptions {
            avatar_bucket: settings.avatar_bucket.clone(),
            avatar_max_bytes: settings.avatar_max_bytes,
            public_base_url: settings.public_base_url.clone(),
        },
    );

    api_server
        .run(settings.bind_addr()?)
        .await
        .context("serving API")
}
