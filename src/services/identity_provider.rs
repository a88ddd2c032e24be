// src/services/identity_provider.rs
//! Client for the identity provider's token endpoint.
//!
//! The API never issues tokens itself. `POST /users/login` forwards the
//! caller's username and password as a resource-owner password grant and
//! hands back the provider's ID token.

use log::{debug, warn};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum IdentityProviderError {
    #[error("token endpoint request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token endpoint returned {0}")]
    Unavailable(reqwest::StatusCode),
    /// The provider answered but issued no ID token, e.g. wrong password.
    #[error("credentials were rejected")]
    Rejected,
}

#[derive(Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
}

/// Forwards credential exchanges to the provider.
pub struct IdentityProviderClient {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl IdentityProviderClient {
    /// # Arguments
    /// * `client` - Shared HTTP client; its timeout bounds each exchange
    /// * `token_url` - Full URL of the provider's `/oauth/token`
    /// * `client_id` / `client_secret` - This API's application credentials
    pub fn new(
        client: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        IdentityProviderClient {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Exchanges a username and password for an ID token.
    ///
    /// # Errors
    /// - `Rejected` if the provider responds without an `id_token`
    /// - `Unavailable` on a 5xx response
    /// - `Http` if the endpoint cannot be reached in time
    pub async fn password_grant(
        &self,
        username: &str,
        password: &str,
    ) -> Result<String, IdentityProviderError> {
        let body = json!({
            "grant_type": "password",
            "username": username,
            "password": password,
            "client_id": self.client_id,
            "client_secret": self.client_secret,
        });
        let response = self.client.post(&self.token_url).json(&body).send().await?;
        let status = response.status();
        if status.is_server_error() {
            return Err(IdentityProviderError::Unavailable(status));
        }

        let bytes = response.bytes().await?;
        match serde_json::from_slice::<TokenResponse>(&bytes) {
            Ok(TokenResponse {
                id_token: Some(token),
            }) => {
                debug!("token endpoint issued an ID token");
                Ok(token)
            }
            _ => {
                warn!("token endpoint returned {status} without an ID token");
                Err(IdentityProviderError::Rejected)
            }
        }
    }
}
