//! Access token signing and validation.
//!
//! Access tokens are stateless HS256 JWTs. They are never persisted, so their
//! validity is purely signature plus expiry.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::db::UserRole;

/// Default access token lifetime: 15 minutes
pub const DEFAULT_ACCESS_TOKEN_SECS: u64 = 15 * 60;

/// JWT claims for access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user UUID)
    pub sub: String,
    pub email: String,
    pub role: UserRole,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Configuration for JWT operations.
#[derive(Clone)]
pub struct JwtConfig {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl_secs: u64,
}

/// Result of generating an access token.
#[derive(Debug, Clone)]
pub struct AccessTokenResult {
    /// The JWT token string
    pub token: String,
    /// Token duration in seconds
    pub duration: u64,
}

/// Current Unix time in seconds.
pub fn unix_now() -> Result<u64, JwtError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| JwtError::TimeError)
}

impl JwtConfig {
    /// Create a new JWT configuration with the given secret and access token lifetime.
    pub fn new(secret: &[u8], access_ttl_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl_secs,
        }
    }

    pub fn access_ttl_secs(&self) -> u64 {
        self.access_ttl_secs
    }

    /// Generate an access token for a user.
    pub fn generate_access_token(
        &self,
        user_uuid: &str,
        email: &str,
        role: UserRole,
    ) -> Result<AccessTokenResult, JwtError> {
        let now = unix_now()?;

        let claims = AccessClaims {
            sub: user_uuid.to_string(),
            email: email.to_string(),
            role,
            iat: now,
            exp: now + self.access_ttl_secs,
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(JwtError::Encoding)?;

        Ok(AccessTokenResult {
            token,
            duration: self.access_ttl_secs,
        })
    }

    /// Validate and decode an access token.
    ///
    /// Expired tokens are reported separately from every other failure so the
    /// caller can phrase its message, but both are rejections.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessClaims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let token_data =
            jsonwebtoken::decode::<AccessClaims>(token, &self.decoding_key, &validation).map_err(
                |e| match e.kind() {
                    ErrorKind::ExpiredSignature => JwtError::Expired,
                    _ => JwtError::Invalid(e),
                },
            )?;

        Ok(token_data.claims)
    }
}

/// Errors that can occur during JWT operations.
#[derive(Debug)]
pub enum JwtError {
    /// Error encoding the token
    Encoding(jsonwebtoken::errors::Error),
    /// Signature valid but `exp` is in the past
    Expired,
    /// Malformed token, bad signature, or bad claims
    Invalid(jsonwebtoken::errors::Error),
    /// System time error
    TimeError,
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            JwtError::Expired => write!(f, "Token expired"),
            JwtError::Invalid(e) => write!(f, "Invalid token: {}", e),
            JwtError::TimeError => write!(f, "System time error"),
        }
    }
}

impl std::error::Error for JwtError {}
