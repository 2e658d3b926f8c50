//! Bearer token verification for routes that require authentication.
//!
//! Tokens are HS256 JWTs carrying the caller id in `user_id` (string or
//! number, as issued by the auth service) or `sub`, plus `exp`.

use crate::domain::config::AuthConfig;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::debug;

/// Verified identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub subject: String,
    /// Expiry, unix seconds
    pub expires_at: u64,
}

/// Why a credential was refused.
///
/// Only logged; callers always see a single `UNAUTHENTICATED` error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingCredential,
    #[error("invalid Authorization format")]
    MalformedScheme,
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token has empty subject")]
    EmptySubject,
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(default)]
    user_id: Option<serde_json::Value>,
    #[serde(default)]
    sub: Option<serde_json::Value>,
    exp: u64,
}

impl RawClaims {
    fn subject(&self) -> Option<String> {
        let value = self.user_id.as_ref().or(self.sub.as_ref())?;
        let subject = match value {
            serde_json::Value::String(s) => s.trim().to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => return None,
        };
        (!subject.is_empty()).then_some(subject)
    }
}

/// HS256 bearer token verifier
#[derive(Clone)]
pub struct AuthGate {
    key: DecodingKey,
    validation: Validation,
}

impl AuthGate {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = config.leeway_secs;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
        }
    }

    /// Verify the raw `Authorization` header value
    pub fn verify(&self, credential: Option<&str>) -> Result<Claims, AuthError> {
        let result = self.verify_inner(credential);
        if let Err(reason) = &result {
            debug!(reason = %reason, "Credential rejected");
        }
        result
    }

    fn verify_inner(&self, credential: Option<&str>) -> Result<Claims, AuthError> {
        let header = credential
            .filter(|h| !h.trim().is_empty())
            .ok_or(AuthError::MissingCredential)?;
        let token = bearer_token(header)?;

        let data = decode::<RawClaims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;

        let subject = data.claims.subject().ok_or(AuthError::EmptySubject)?;
        Ok(Claims {
            subject,
            expires_at: data.claims.exp,
        })
    }
}

/// Split `Bearer <token>`; the scheme is case-insensitive.
fn bearer_token(header: &str) -> Result<&str, AuthError> {
    let mut parts = header.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Ok(token),
        _ => Err(AuthError::MalformedScheme),
    }
}
