//! Caller Authentication
//!
//! Validates JWTs from an external identity provider and maps the `sub`
//! claim to a participant [`Address`]. The node never issues tokens.
//!
//! Dev mode is opt-in (`HELIX_DEV_MODE=1`) and only applies when no key is
//! configured: the "token" is then a bare hex address, which lets local tools
//! act as any participant. With neither, every login is refused.

use jsonwebtoken::{decode, DecodingKey, Validation, Algorithm, TokenData};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::Address;

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Expected issuer claim ("iss"). If None, any issuer accepted.
    pub issuer: Option<String>,
    /// Expected audience claim ("aud"). If None, any audience accepted.
    pub audience: Option<String>,
    /// RS256 public key in PEM format.
    pub public_key_pem: Option<String>,
    /// HS256 secret.
    pub secret: Option<String>,
    /// Skip expiry validation (testing only).
    pub skip_expiry: bool,
    /// Accept bare hex addresses when no key is configured.
    pub dev_mode: bool,
}

impl AuthConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            issuer: std::env::var("AUTH_ISSUER").ok(),
            audience: std::env::var("AUTH_AUDIENCE").ok(),
            public_key_pem: std::env::var("AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("AUTH_SECRET").ok(),
            skip_expiry: env_flag("AUTH_SKIP_EXPIRY"),
            dev_mode: dev_mode_from_env(),
        }
    }

    /// Dev-mode config: bare addresses, no JWT.
    pub fn dev() -> Self {
        Self { dev_mode: true, ..Default::default() }
    }

    /// Check if JWT validation is configured.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

/// Whether `HELIX_DEV_MODE` is set.
pub fn dev_mode_from_env() -> bool {
    env_flag("HELIX_DEV_MODE")
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

/// JWT claims we read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (provider user id).
    pub sub: String,
    /// Expiry (Unix seconds).
    #[serde(default)]
    pub exp: u64,
    /// Issued at.
    #[serde(default)]
    pub iat: u64,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience.
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    /// Participant address derived from the subject.
    pub fn address(&self) -> Address {
        Address::from_subject(&self.sub)
    }
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No JWT key configured.
    #[error("authentication not configured")]
    NotConfigured,
    /// Malformed token.
    #[error("invalid token format")]
    InvalidFormat,
    /// Signature check failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token expired.
    #[error("token expired")]
    Expired,
    /// Issuer mismatch.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Audience mismatch.
    #[error("invalid audience")]
    InvalidAudience,
    /// Required claim missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// Dev-mode token is not an address.
    #[error("dev-mode token must be a hex address")]
    InvalidDevAddress,
    /// Other decoding failure.
    #[error("decode error: {0}")]
    DecodeError(String),
}

/// Resolve a token to the caller's address.
///
/// JWT when configured, otherwise the dev-mode hex address if enabled.
pub fn authenticate(token: &str, config: &AuthConfig) -> Result<Address, AuthError> {
    if config.is_configured() {
        validate_token(token, config).map(|claims| claims.address())
    } else if config.dev_mode {
        token.parse().map_err(|_| AuthError::InvalidDevAddress)
    } else {
        Err(AuthError::NotConfigured)
    }
}

/// Validate a JWT and extract its claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    let algorithm = if config.public_key_pem.is_some() {
        Algorithm::RS256
    } else {
        Algorithm::HS256
    };

    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims = std::collections::HashSet::new();

    if let Some(ref issuer) = config.issuer {
        validation.set_issuer(&[issuer]);
    }
    if let Some(ref audience) = config.audience {
        validation.set_audience(&[audience]);
    } else {
        validation.validate_aud = false;
    }
    if config.skip_expiry {
        validation.validate_exp = false;
    }

    let token_data: TokenData<TokenClaims> = if let Some(ref pem) = config.public_key_pem {
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| AuthError::DecodeError(format!("invalid public key: {}", e)))?;
        decode(token, &key, &validation).map_err(map_jwt_error)?
    } else if let Some(ref secret) = config.secret {
        let key = DecodingKey::from_secret(secret.as_bytes());
        decode(token, &key, &validation).map_err(map_jwt_error)?
    } else {
        return Err(AuthError::NotConfigured);
    };

    let claims = token_data.claims;
    if claims.sub.is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }

    // jsonwebtoken skips exp when it is absent from the required set
    if !config.skip_expiry && claims.exp > 0 {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        if now > claims.exp {
            return Err(AuthError::Expired);
        }
    }

    Ok(claims)
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
        _ => AuthError::DecodeError(err.to_string()),
    }
}

// =============================================================================
// TESTS
// =============================================================================
