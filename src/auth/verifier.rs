// src/auth/verifier.rs
//! Bearer-credential verification.
//!
//! Validates the token carried in an `Authorization` header against the
//! identity provider's key set and returns the verified claims.
//!
//! # Verification flow
//! 1. Split the header into `<scheme> <token>`; the scheme is not checked
//! 2. Decode the token header *without* verifying it, to learn `alg` and `kid`
//! 3. Refuse symmetric algorithms and anything outside the accepted list
//! 4. Find the provider key whose `kid` matches
//! 5. Verify the signature with that key, then `exp`, `aud` and `iss`
//!
//! Steps 2 and 4 cannot be merged: the key that verifies the signature is
//! only known once the unverified header has named it.
//!
//! # Security
//! The failure kind is for diagnostics only. Callers facing unauthenticated
//! clients must collapse every [`AuthError`] except
//! [`AuthError::UpstreamUnavailable`] into one generic 401.

use super::key_set::{KeySetEntry, KeySetError, KeySource};
use axum::http::StatusCode;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Why a credential was rejected.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authorization header is missing")]
    NoAuthHeader,
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("no RSA key in JWKS")]
    NoRsaKey,
    #[error("token is expired")]
    TokenExpired,
    #[error("incorrect claims, please check the audience and issuer")]
    InvalidClaims,
    #[error("key set unavailable: {0}")]
    UpstreamUnavailable(#[from] KeySetError),
}

impl AuthError {
    /// Stable diagnostic code for logs.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::NoAuthHeader => "no_auth_header",
            AuthError::InvalidHeader(_) => "invalid_header",
            AuthError::NoRsaKey => "no_rsa_key",
            AuthError::TokenExpired => "token_expired",
            AuthError::InvalidClaims => "invalid_claims",
            AuthError::UpstreamUnavailable(_) => "upstream_unavailable",
        }
    }

    /// HTTP status for this failure. Only an unreachable key set is not 401.
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

/// Claims of a verified credential.
///
/// `sub` is the only claim the access-control core relies on; the rest are
/// kept for diagnostics and handlers that want them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuthenticatedClaims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// String or array of strings, as issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AuthenticatedClaims {
    pub fn subject(&self) -> &str {
        &self.sub
    }
}

/// What a credential must satisfy besides a valid signature.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Expected `iss`, e.g. `https://tenant.auth0.com/`
    pub issuer: String,
    /// Expected `aud`: the API's client identifier
    pub audience: String,
    /// Accepted asymmetric algorithms
    pub algorithms: Vec<Algorithm>,
    /// Seconds of clock skew tolerated on `exp`
    pub leeway_secs: u64,
}

/// Verifies bearer credentials against the provider key set.
pub struct CredentialVerifier {
    keys: Arc<dyn KeySource>,
    config: VerifierConfig,
}

impl CredentialVerifier {
    pub fn new(keys: Arc<dyn KeySource>, config: VerifierConfig) -> Self {
        CredentialVerifier { keys, config }
    }

    /// Verifies the raw value of an `Authorization` header.
    ///
    /// # Arguments
    /// * `authorization` - Header value, or `None` when the header is absent
    ///
    /// # Returns
    /// The verified claims of the presented token.
    ///
    /// # Errors
    /// - `NoAuthHeader` if the header is absent or has no token part
    /// - `InvalidHeader` if the token cannot be parsed, uses a symmetric or
    ///   unaccepted algorithm, or fails signature verification
    /// - `NoRsaKey` if no provider key matches the token's `kid`
    /// - `TokenExpired` if `exp` has passed
    /// - `InvalidClaims` if `aud`, `iss` or `sub` do not check out
    /// - `UpstreamUnavailable` if the key set cannot be fetched
    pub async fn verify(
        &self,
        authorization: Option<&str>,
    ) -> Result<AuthenticatedClaims, AuthError> {
        let token = bearer_token(authorization)?;

        // Unverified pass: only used to pick the algorithm and the key
        let header = decode_header(token)
            .map_err(|_| AuthError::InvalidHeader("unable to parse token header".into()))?;
        if is_symmetric(header.alg) {
            return Err(AuthError::InvalidHeader(format!(
                "{:?} is a shared-secret algorithm",
                header.alg
            )));
        }
        if !self.config.algorithms.contains(&header.alg) {
            return Err(AuthError::InvalidHeader(format!(
                "{:?} is not an accepted algorithm",
                header.alg
            )));
        }
        let kid = header.kid.as_deref().ok_or(AuthError::NoRsaKey)?;
        let entry = self
            .keys
            .find_key(kid)
            .await?
            .ok_or(AuthError::NoRsaKey)?;
        let key = decoding_key(&entry)?;

        // Verified pass
        let mut validation = Validation::new(header.alg);
        validation.algorithms = self.config.algorithms.clone();
        validation.set_audience(&[self.config.audience.as_str()]);
        validation.set_issuer(&[self.config.issuer.as_str()]);
        // Absent claims would otherwise skip the aud/iss comparison
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = self.config.leeway_secs;

        let verified = decode::<Value>(token, &key, &validation).map_err(classify)?;
        let claims: AuthenticatedClaims = serde_json::from_value(verified.claims)
            .map_err(|_| AuthError::InvalidClaims)?;
        debug!("verified credential for subject {}", claims.sub);
        Ok(claims)
    }
}

/// Extracts the token from `<scheme> <token>`.
fn bearer_token(authorization: Option<&str>) -> Result<&str, AuthError> {
    let mut parts = authorization.ok_or(AuthError::NoAuthHeader)?.split_whitespace();
    let _scheme = parts.next().ok_or(AuthError::NoAuthHeader)?;
    parts.next().ok_or(AuthError::NoAuthHeader)
}

fn is_symmetric(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

fn decoding_key(entry: &KeySetEntry) -> Result<DecodingKey, AuthError> {
    if entry.kty != "RSA" {
        return Err(AuthError::InvalidHeader(format!(
            "key {} has type {}, expected RSA",
            entry.kid, entry.kty
        )));
    }
    let (Some(n), Some(e)) = (entry.n.as_deref(), entry.e.as_deref()) else {
        return Err(AuthError::InvalidHeader(format!(
            "key {} lacks RSA components",
            entry.kid
        )));
    };
    DecodingKey::from_rsa_components(n, e)
        .map_err(|err| AuthError::InvalidHeader(format!("unusable key {}: {err}", entry.kid)))
}

/// Maps a signature/claim verification failure onto the public taxonomy.
fn classify(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        ErrorKind::InvalidAudience
        | ErrorKind::InvalidIssuer
        | ErrorKind::InvalidSubject
        | ErrorKind::ImmatureSignature
        | ErrorKind::MissingRequiredClaim(_) => AuthError::InvalidClaims,
        _ => AuthError::InvalidHeader("unable to parse authentication token".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::*;
    use jsonwebtoken::{EncodingKey, Header};
    use serde_json::json;

    #[tokio::test]
    async fn accepts_valid_token() {
        let verifier = test_verifier();
        let header = bearer(&token_for("auth0|alice"));

        let claims = verifier.verify(Some(&header)).await.expect("valid");
        assert_eq!(claims.subject(), "auth0|alice");
        assert_eq!(claims.iss.as_deref(), Some(TEST_ISSUER));
    }

    #[tokio::test]
    async fn scheme_is_not_checked() {
        let verifier = test_verifier();
        let header = format!("Token   {}", token_for("auth0|alice"));
        assert!(verifier.verify(Some(&header)).await.is_ok());
    }

    #[tokio::test]
    async fn missing_or_incomplete_header_is_no_auth_header() {
        let keys = Arc::new(StaticKeys::new(vec![test_entry()]));
        let verifier = CredentialVerifier::new(keys.clone(), verifier_config());

        for header in [None, Some(""), Some("Bearer"), Some("   ")] {
            let err = verifier.verify(header).await.unwrap_err();
            assert!(matches!(err, AuthError::NoAuthHeader), "{header:?}");
            assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        }
        assert_eq!(keys.lookups(), 0);
    }

    #[tokio::test]
    async fn garbage_token_is_invalid_header() {
        let verifier = test_verifier();
        let err = verifier.verify(Some("Bearer not.a.jwt")).await.unwrap_err();
        assert_eq!(err.code(), "invalid_header");
    }

    #[tokio::test]
    async fn symmetric_tokens_rejected_before_key_lookup() {
        let keys = Arc::new(StaticKeys::new(vec![test_entry()]));
        let verifier = CredentialVerifier::new(keys.clone(), verifier_config());

        for alg in [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512] {
            let mut header = Header::new(alg);
            header.kid = Some(TEST_KID.to_string());
            // Correctly signed with a shared secret; must still be refused
            let token = jsonwebtoken::encode(
                &header,
                &claims_for("auth0|mallory"),
                &EncodingKey::from_secret(b"shared-secret"),
            )
            .unwrap();

            let err = verifier.verify(Some(&bearer(&token))).await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidHeader(_)), "{alg:?}");
        }
        assert_eq!(keys.lookups(), 0);
    }

    #[tokio::test]
    async fn unaccepted_asymmetric_algorithm_is_invalid_header() {
        let mut header = Header::new(Algorithm::RS384);
        header.kid = Some(TEST_KID.to_string());
        let token = jsonwebtoken::encode(
            &header,
            &claims_for("auth0|alice"),
            &EncodingKey::from_rsa_pem(TEST_PRIVATE_KEY_PEM.as_bytes()).unwrap(),
        )
        .unwrap();

        let err = test_verifier()
            .verify(Some(&bearer(&token)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_header");
    }

    #[tokio::test]
    async fn unknown_or_missing_kid_is_no_rsa_key() {
        let verifier = test_verifier();

        let token = sign_claims(&claims_for("auth0|alice"), Some("rotated-away"));
        let err = verifier.verify(Some(&bearer(&token))).await.unwrap_err();
        assert!(matches!(err, AuthError::NoRsaKey));

        let token = sign_claims(&claims_for("auth0|alice"), None);
        let err = verifier.verify(Some(&bearer(&token))).await.unwrap_err();
        assert!(matches!(err, AuthError::NoRsaKey));
    }

    #[tokio::test]
    async fn expired_token_is_token_expired() {
        let mut claims = claims_for("auth0|alice");
        claims["exp"] = json!(now() - 600);
        claims["iat"] = json!(now() - 1200);
        let token = sign_claims(&claims, Some(TEST_KID));

        let err = test_verifier()
            .verify(Some(&bearer(&token)))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired));
    }

    #[tokio::test]
    async fn expiry_wins_over_bad_audience() {
        let mut claims = claims_for("auth0|alice");
        claims["exp"] = json!(now() - 600);
        claims["aud"] = json!("someone-else");
        let token = sign_claims(&claims, Some(TEST_KID));

        let err = test_verifier()
            .verify(Some(&bearer(&token)))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired));
    }

    #[tokio::test]
    async fn wrong_audience_or_issuer_is_invalid_claims() {
        let verifier = test_verifier();

        let mut claims = claims_for("auth0|alice");
        claims["aud"] = json!("another-client");
        let token = sign_claims(&claims, Some(TEST_KID));
        let err = verifier.verify(Some(&bearer(&token))).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidClaims));

        let mut claims = claims_for("auth0|alice");
        claims["iss"] = json!("https://evil.example/");
        let token = sign_claims(&claims, Some(TEST_KID));
        let err = verifier.verify(Some(&bearer(&token))).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidClaims));
    }

    #[tokio::test]
    async fn missing_audience_or_issuer_is_invalid_claims() {
        let verifier = test_verifier();

        for claim in ["aud", "iss"] {
            let mut claims = claims_for("auth0|alice");
            claims.as_object_mut().unwrap().remove(claim);
            let token = sign_claims(&claims, Some(TEST_KID));

            let err = verifier.verify(Some(&bearer(&token))).await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidClaims), "without {claim}");
            assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn missing_subject_is_invalid_claims() {
        let mut claims = claims_for("auth0|alice");
        claims.as_object_mut().unwrap().remove("sub");
        let token = sign_claims(&claims, Some(TEST_KID));

        let err = test_verifier()
            .verify(Some(&bearer(&token)))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidClaims));
    }

    #[tokio::test]
    async fn tampered_signature_is_invalid_header() {
        let token = token_for("auth0|alice");
        let (unsigned, signature) = token.rsplit_once('.').unwrap();
        let mut forged: Vec<char> = signature.chars().collect();
        let mid = forged.len() / 2;
        forged[mid] = if forged[mid] == 'A' { 'B' } else { 'A' };
        let forged: String = forged.into_iter().collect();
        let tampered = format!("{unsigned}.{forged}");

        let err = test_verifier()
            .verify(Some(&bearer(&tampered)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_header");
    }

    #[tokio::test]
    async fn non_rsa_key_is_invalid_header() {
        let mut entry = test_entry();
        entry.kty = "EC".to_string();
        let verifier =
            CredentialVerifier::new(Arc::new(StaticKeys::new(vec![entry])), verifier_config());

        let err = verifier
            .verify(Some(&bearer(&token_for("auth0|alice"))))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_header");
    }

    #[tokio::test]
    async fn unreachable_key_set_is_upstream_failure() {
        let verifier = CredentialVerifier::new(Arc::new(UnavailableKeys), verifier_config());

        let err = verifier
            .verify(Some(&bearer(&token_for("auth0|alice"))))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UpstreamUnavailable(_)));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
