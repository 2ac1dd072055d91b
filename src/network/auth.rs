//! Connection Identity
//!
//! Every WebSocket connection carries a `token` query parameter. How it maps
//! to a [`PlayerId`] depends on whether a verification key is configured:
//!
//! - no key: sessions are established upstream and the token *is* the player
//!   id (trimmed);
//! - HS256 secret or RS256 public key: the token must be a JWT signed by the
//!   external provider, and its `sub` claim is the player id.
//!
//! The server only verifies tokens; it never issues them.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::game::player::PlayerId;

/// Key used to verify provider-signed tokens.
#[derive(Clone)]
pub enum VerificationKey {
    /// Shared HS256 secret.
    Secret(String),
    /// RS256 public key, PEM encoded.
    RsaPublicPem(String),
}

impl VerificationKey {
    fn algorithm(&self) -> Algorithm {
        match self {
            Self::Secret(_) => Algorithm::HS256,
            Self::RsaPublicPem(_) => Algorithm::RS256,
        }
    }

    fn decoding_key(&self) -> Result<DecodingKey, AuthError> {
        match self {
            Self::Secret(secret) => Ok(DecodingKey::from_secret(secret.as_bytes())),
            Self::RsaPublicPem(pem) => DecodingKey::from_rsa_pem(pem.as_bytes())
                .map_err(|e| AuthError::InvalidKey(e.to_string())),
        }
    }
}

impl std::fmt::Debug for VerificationKey {
    // Never print key material
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Secret(_) => f.write_str("Secret(..)"),
            Self::RsaPublicPem(_) => f.write_str("RsaPublicPem(..)"),
        }
    }
}

/// Identity settings. Without a key, raw tokens are trusted as player ids.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Verification key; `None` trusts raw tokens.
    pub key: Option<VerificationKey>,
    /// Required `iss`, if any.
    pub issuer: Option<String>,
    /// Required `aud`, if any.
    pub audience: Option<String>,
    /// Accept expired tokens (local testing).
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Read `AUTH_PUBLIC_KEY_PEM` (preferred) or `AUTH_SECRET`, plus
    /// `AUTH_ISSUER`, `AUTH_AUDIENCE` and `AUTH_SKIP_EXPIRY`.
    pub fn from_env() -> Self {
        let key = non_empty_var("AUTH_PUBLIC_KEY_PEM")
            .map(VerificationKey::RsaPublicPem)
            .or_else(|| non_empty_var("AUTH_SECRET").map(VerificationKey::Secret));
        Self {
            key,
            issuer: non_empty_var("AUTH_ISSUER"),
            audience: non_empty_var("AUTH_AUDIENCE"),
            skip_expiry: non_empty_var("AUTH_SKIP_EXPIRY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// HS256 config for a shared secret.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            key: Some(VerificationKey::Secret(secret.into())),
            ..Self::default()
        }
    }

    /// A verification key is set.
    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        // Providers disagree on which registered claims they emit
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = !self.skip_expiry;
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        validation
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Claims read from a provider token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject; becomes the player id.
    #[serde(default)]
    pub sub: String,
    /// Expiry (Unix seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Audience; a string or a list depending on the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,
}

/// Why a connection token was refused.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token parameter was blank.
    #[error("empty token")]
    EmptyToken,
    /// JWT validation requested without a key.
    #[error("no verification key configured")]
    NotConfigured,
    /// Configured key could not be parsed.
    #[error("invalid verification key: {0}")]
    InvalidKey(String),
    /// Not a well-formed JWT.
    #[error("malformed token")]
    Malformed,
    /// Signature does not match the key.
    #[error("bad signature")]
    BadSignature,
    /// Past `exp`.
    #[error("token expired")]
    Expired,
    /// `iss` mismatch.
    #[error("unexpected issuer")]
    WrongIssuer,
    /// `aud` mismatch.
    #[error("unexpected audience")]
    WrongAudience,
    /// `sub` missing or empty.
    #[error("token has no subject")]
    MissingSubject,
    /// Anything else jsonwebtoken reports.
    #[error("token rejected: {0}")]
    Rejected(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::BadSignature,
            ErrorKind::InvalidIssuer => Self::WrongIssuer,
            ErrorKind::InvalidAudience => Self::WrongAudience,
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                Self::Malformed
            }
            _ => Self::Rejected(err.to_string()),
        }
    }
}

/// Player identity for a connection token.
pub fn resolve_identity(token: &str, config: &AuthConfig) -> Result<PlayerId, AuthError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::EmptyToken);
    }
    if !config.is_configured() {
        return Ok(PlayerId::new(token));
    }
    let claims = validate_token(token, config)?;
    Ok(PlayerId::new(claims.sub))
}

/// Verify a provider JWT and return its claims. The subject must be present.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    let key = config.key.as_ref().ok_or(AuthError::NotConfigured)?;
    let validation = config.validation(key.algorithm());
    let claims = decode::<TokenClaims>(token, &key.decoding_key()?, &validation)?.claims;

    if claims.sub.trim().is_empty() {
        return Err(AuthError::MissingSubject);
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "arena-test-secret-0123456789abcdef";

    fn sign(claims: &TokenClaims, secret: &str) -> String {
        encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn claims_for(sub: &str) -> TokenClaims {
        let now = chrono::Utc::now().timestamp() as u64;
        TokenClaims {
            sub: sub.into(),
            exp: Some(now + 3600),
            iss: Some("lobby".into()),
            aud: Some(serde_json::json!("arena")),
        }
    }

    #[test]
    fn test_raw_token_is_identity_without_key() {
        let config = AuthConfig::default();
        assert!(!config.is_configured());
        assert_eq!(resolve_identity("alice", &config).unwrap(), PlayerId::new("alice"));
        assert_eq!(resolve_identity("  bob ", &config).unwrap(), PlayerId::new("bob"));
        assert!(matches!(resolve_identity("   ", &config), Err(AuthError::EmptyToken)));
    }

    #[test]
    fn test_jwt_subject_is_identity_with_key() {
        let config = AuthConfig::with_secret(SECRET);
        let token = sign(&claims_for("player-77"), SECRET);

        assert_eq!(resolve_identity(&token, &config).unwrap(), PlayerId::new("player-77"));
        // A bare name is not a JWT once a key is configured
        assert!(matches!(resolve_identity("alice", &config), Err(AuthError::Malformed)));
    }

    #[test]
    fn test_expired_token_rejected_unless_skipped() {
        let mut claims = claims_for("alice");
        claims.exp = Some(1);
        let token = sign(&claims, SECRET);

        let strict = AuthConfig::with_secret(SECRET);
        assert!(matches!(validate_token(&token, &strict), Err(AuthError::Expired)));

        let lenient = AuthConfig { skip_expiry: true, ..AuthConfig::with_secret(SECRET) };
        assert_eq!(validate_token(&token, &lenient).unwrap().sub, "alice");
    }

    #[test]
    fn test_token_without_exp_accepted() {
        let mut claims = claims_for("alice");
        claims.exp = None;
        let token = sign(&claims, SECRET);
        assert!(validate_token(&token, &AuthConfig::with_secret(SECRET)).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = sign(&claims_for("alice"), "some-other-secret-0123456789abcd");
        let result = validate_token(&token, &AuthConfig::with_secret(SECRET));
        assert!(matches!(result, Err(AuthError::BadSignature)));
    }

    #[test]
    fn test_empty_subject_rejected() {
        let token = sign(&claims_for(""), SECRET);
        let result = validate_token(&token, &AuthConfig::with_secret(SECRET));
        assert!(matches!(result, Err(AuthError::MissingSubject)));
    }

    #[test]
    fn test_issuer_and_audience_checked_when_set() {
        let token = sign(&claims_for("alice"), SECRET);

        let issuer = AuthConfig { issuer: Some("elsewhere".into()), ..AuthConfig::with_secret(SECRET) };
        assert!(matches!(validate_token(&token, &issuer), Err(AuthError::WrongIssuer)));

        let audience = AuthConfig { audience: Some("billing".into()), ..AuthConfig::with_secret(SECRET) };
        assert!(matches!(validate_token(&token, &audience), Err(AuthError::WrongAudience)));

        let matching = AuthConfig {
            issuer: Some("lobby".into()),
            audience: Some("arena".into()),
            ..AuthConfig::with_secret(SECRET)
        };
        assert!(validate_token(&token, &matching).is_ok());
    }

    #[test]
    fn test_validate_without_key() {
        let result = validate_token("a.b.c", &AuthConfig::default());
        assert!(matches!(result, Err(AuthError::NotConfigured)));
    }

    #[test]
    fn test_bad_pem_reported() {
        let config = AuthConfig {
            key: Some(VerificationKey::RsaPublicPem("not a pem".into())),
            ..AuthConfig::default()
        };
        let token = sign(&claims_for("alice"), SECRET);
        assert!(matches!(validate_token(&token, &config), Err(AuthError::InvalidKey(_))));
    }

    #[test]
    fn test_debug_hides_key() {
        let config = AuthConfig::with_secret(SECRET);
        assert!(!format!("{:?}", config).contains(SECRET));
    }
}
