// src/config.rs
//! Process configuration.
//!
//! Settings are read once at startup from the environment (after `main` has
//! loaded an optional `.env` file) and are not reloadable.
//!
//! ## Environment Variables
//! - `AUTH0_DOMAIN`: identity-provider domain (required)
//! - `AUTH0_CLIENT_ID`: expected token audience and login client id (required)
//! - `AUTH0_CLIENT_SECRET`: forwarded on login (required)
//! - `AUTH0_BASE_URL`: overrides `https://<domain>` for outbound calls
//! - `AUTH0_ALGORITHMS`: comma-separated RSA algorithms (default: RS256)
//! - `JWKS_CACHE_TTL_SECS`: key-set reuse window, 0 fetches every time (default: 0)
//! - `UPSTREAM_TIMEOUT_SECS`: bound on every backend call (default: 5)
//! - `CLOCK_SKEW_SECS`: leeway on token expiry (default: 0)
//! - `AVATAR_BUCKET`: object-store bucket for avatars (default: avatars)
//! - `AVATAR_MAX_BYTES`: upload size limit (default: 5 MiB)
//! - `BIND_ADDR`: listen address (default: 127.0.0.1:8080)
//! - `PUBLIC_BASE_URL`: base of self links; the `Host` header is used otherwise

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment};
use jsonwebtoken::Algorithm;
use serde::Deserialize;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub auth0_domain: String,
    pub auth0_client_id: String,
    pub auth0_client_secret: String,
    #[serde(default)]
    pub auth0_base_url: Option<String>,
    pub auth0_algorithms: String,
    pub jwks_cache_ttl_secs: u64,
    pub upstream_timeout_secs: u64,
    pub clock_skew_secs: u64,
    pub avatar_bucket: String,
    pub avatar_max_bytes: usize,
    pub bind_addr: String,
    #[serde(default)]
    pub public_base_url: Option<String>,
}

impl Settings {
    /// Builder preloaded with every default, without any source attached.
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>, SettingsError> {
        Ok(Config::builder()
            .set_default("auth0_algorithms", "RS256")?
            .set_default("jwks_cache_ttl_secs", 0_i64)?
            .set_default("upstream_timeout_secs", 5_i64)?
            .set_default("clock_skew_secs", 0_i64)?
            .set_default("avatar_bucket", "avatars")?
            .set_default("avatar_max_bytes", 5_i64 * 1024 * 1024)?
            .set_default("bind_addr", "127.0.0.1:8080")?)
    }

    /// Loads settings from the process environment.
    pub fn load() -> Result<Self, SettingsError> {
        let config = Self::defaults()?
            .add_source(Environment::default())
            .build()?;
        Self::from_config(config)
    }

    /// Deserializes and validates an already-built configuration.
    pub fn from_config(config: Config) -> Result<Self, SettingsError> {
        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        for (name, value) in [
            ("AUTH0_DOMAIN", &self.auth0_domain),
            ("AUTH0_CLIENT_ID", &self.auth0_client_id),
            ("AUTH0_CLIENT_SECRET", &self.auth0_client_secret),
        ] {
            if value.trim().is_empty() {
                return Err(SettingsError::Invalid(format!("{name} must be set")));
            }
        }
        self.algorithms()?;
        self.bind_addr()?;
        Ok(())
    }

    /// Expected `iss` claim.
    pub fn issuer(&self) -> String {
        format!("https://{}/", self.auth0_domain)
    }

    fn provider_base(&self) -> String {
        match &self.auth0_base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}", self.auth0_domain),
        }
    }

    pub fn jwks_url(&self) -> String {
        format!("{}/.well-known/jwks.json", self.provider_base())
    }

    pub fn token_url(&self) -> String {
        format!("{}/oauth/token", self.provider_base())
    }

    /// Parses `AUTH0_ALGORITHMS`, accepting RSA signature algorithms only.
    pub fn algorithms(&self) -> Result<Vec<Algorithm>, SettingsError> {
        let mut algorithms = Vec::new();
        for name in self.auth0_algorithms.split(',').map(str::trim) {
            if name.is_empty() {
                continue;
            }
            let algorithm = Algorithm::from_str(name)
                .map_err(|_| SettingsError::Invalid(format!("unknown algorithm {name}")))?;
            match algorithm {
                Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::PS256
                | Algorithm::PS384
                | Algorithm::PS512 => algorithms.push(algorithm),
                Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                    return Err(SettingsError::Invalid(format!(
                        "{name} is a shared-secret algorithm"
                    )))
                }
                _ => {
                    return Err(SettingsError::Invalid(format!(
                        "{name} does not use RSA keys"
                    )))
                }
            }
        }
        if algorithms.is_empty() {
            return Err(SettingsError::Invalid(
                "AUTH0_ALGORITHMS names no algorithm".into(),
            ));
        }
        Ok(algorithms)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, SettingsError> {
        self.bind_addr
            .parse()
            .map_err(|_| SettingsError::Invalid(format!("BIND_ADDR {}", self.bind_addr)))
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn jwks_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.jwks_cache_ttl_secs)
    }
}
