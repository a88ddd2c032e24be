// src/error.rs
//! HTTP-facing error type.
//!
//! Every handler returns `Result<_, ApiError>`. Component errors convert into
//! one of a small set of fixed responses, all rendered as
//! `{"Error": "<message>"}`. Internal detail (which credential check failed,
//! which filter denied, why a backend call failed) is logged here and never
//! sent to the caller.

use crate::auth::authorizer::AuthzError;
use crate::auth::guard::GuardError;
use crate::auth::verifier::AuthError;
use crate::services::identity_provider::IdentityProviderError;
use crate::storage::blob_store::BlobError;
use crate::storage::StoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{error, warn};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("The request body is invalid")]
    BadRequest,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("You don't have permission on this resource")]
    Forbidden,
    #[error("Not found")]
    NotFound,
    #[error("Enrollment data is invalid")]
    InvalidEnrollment,
    /// A backend the request depends on failed; the detail is logged only.
    #[error("Service unavailable")]
    Upstream(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::InvalidEnrollment => StatusCode::CONFLICT,
            ApiError::Upstream(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Upstream(detail) = &self {
            error!("upstream failure: {detail}");
        }
        (self.status(), Json(json!({ "Error": self.to_string() }))).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::UpstreamUnavailable(source) => ApiError::Upstream(source.to_string()),
            other => {
                warn!("authentication failed [{}]: {other}", other.code());
                ApiError::Unauthorized
            }
        }
    }
}

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::Forbidden => ApiError::Forbidden,
            AuthzError::Store(source) => source.into(),
        }
    }
}

impl From<GuardError> for ApiError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::NotFound(_) => ApiError::NotFound,
            GuardError::Store(source) => source.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Upstream(err.to_string())
    }
}

impl From<BlobError> for ApiError {
    fn from(err: BlobError) -> Self {
        ApiError::Upstream(err.to_string())
    }
}

impl From<IdentityProviderError> for ApiError {
    fn from(err: IdentityProviderError) -> Self {
        match err {
            IdentityProviderError::Rejected => ApiError::Unauthorized,
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::key_set::KeySetError;
    use crate::storage::Key;
    use std::time::Duration;

    async fn body_of(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn renders_fixed_bodies() {
        let cases = [
            (ApiError::BadRequest, 400, "The request body is invalid"),
            (ApiError::Unauthorized, 401, "Unauthorized"),
            (ApiError::Forbidden, 403, "You don't have permission on this resource"),
            (ApiError::NotFound, 404, "Not found"),
            (ApiError::InvalidEnrollment, 409, "Enrollment data is invalid"),
            (ApiError::Upstream("db down".into()), 503, "Service unavailable"),
        ];
        for (err, status, message) in cases {
            let (actual, body) = body_of(err).await;
            assert_eq!(actual.as_u16(), status);
            assert_eq!(body, json!({ "Error": message }));
        }
    }

    #[test]
    fn every_credential_failure_collapses_to_unauthorized() {
        let failures = [
            AuthError::NoAuthHeader,
            AuthError::InvalidHeader("bad".into()),
            AuthError::NoRsaKey,
            AuthError::TokenExpired,
            AuthError::InvalidClaims,
        ];
        for failure in failures {
            assert!(matches!(ApiError::from(failure), ApiError::Unauthorized));
        }
    }

    #[test]
    fn backend_failures_are_service_unavailable() {
        let from_keys = ApiError::from(AuthError::UpstreamUnavailable(KeySetError::Malformed(
            "truncated".into(),
        )));
        assert_eq!(from_keys.status(), StatusCode::SERVICE_UNAVAILABLE);

        let from_guard =
            ApiError::from(GuardError::Store(StoreError::Timeout(Duration::from_secs(5))));
        assert_eq!(from_guard.status(), StatusCode::SERVICE_UNAVAILABLE);

        let from_authz = ApiError::from(AuthzError::Store(StoreError::Unavailable("x".into())));
        assert_eq!(from_authz.status(), StatusCode::SERVICE_UNAVAILABLE);

        let from_blobs = ApiError::from(BlobError::Timeout(Duration::from_secs(5)));
        assert_eq!(from_blobs.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn guard_and_authz_map_to_404_and_403() {
        let missing = ApiError::from(GuardError::NotFound(Key::new("courses", 42)));
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::from(AuthzError::Forbidden).status(), StatusCode::FORBIDDEN);
    }
}
