//! Token issuance, rotation, and revocation.
//!
//! Access tokens are signed JWTs that are never stored. Refresh tokens are
//! opaque random strings persisted in `refresh_tokens`; they carry no
//! information and can only be looked up.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::db::{Database, NewRefreshToken, User};
use crate::jwt::{DEFAULT_ACCESS_TOKEN_SECS, JwtConfig, JwtError, unix_now};
use crate::oauth::OAuthProvider;

/// Default refresh token lifetime: 7 days
pub const DEFAULT_REFRESH_TOKEN_SECS: u64 = 7 * 24 * 60 * 60;

/// Default "remember me" refresh token lifetime: 30 days
pub const DEFAULT_EXTENDED_REFRESH_TOKEN_SECS: u64 = 30 * 24 * 60 * 60;

/// Number of random bytes in opaque tokens.
const OPAQUE_TOKEN_BYTES: usize = 32;

/// Generate an unguessable URL-safe token.
pub fn random_token() -> String {
    let mut bytes = [0u8; OPAQUE_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// How the user proved their identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Password,
    OAuth(OAuthProvider),
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Password => write!(f, "password"),
            AuthMethod::OAuth(provider) => write!(f, "oauth:{}", provider.as_str()),
        }
    }
}

/// Token lifetimes in seconds.
#[derive(Debug, Clone, Copy)]
pub struct TokenLifetimes {
    pub access: u64,
    pub refresh: u64,
    /// Refresh lifetime when the user asked to be remembered
    pub extended_refresh: u64,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            access: DEFAULT_ACCESS_TOKEN_SECS,
            refresh: DEFAULT_REFRESH_TOKEN_SECS,
            extended_refresh: DEFAULT_EXTENDED_REFRESH_TOKEN_SECS,
        }
    }
}

impl TokenLifetimes {
    fn refresh_for(&self, extended: bool) -> u64 {
        if extended {
            self.extended_refresh
        } else {
            self.refresh
        }
    }
}

/// An access/refresh token pair as returned to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Errors from issuing or rotating tokens.
#[derive(Debug, Error)]
pub enum IssueError {
    /// Unknown, revoked, or expired refresh token. The cases are deliberately
    /// not distinguished.
    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    /// The refresh token is valid but its owner no longer exists.
    #[error("User not found")]
    UserNotFound,

    #[error("Token signing failed: {0}")]
    Signing(#[from] JwtError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Issues and rotates token pairs.
pub struct TokenIssuer {
    jwt: Arc<JwtConfig>,
    db: Database,
    lifetimes: TokenLifetimes,
}

impl TokenIssuer {
    pub fn new(jwt: Arc<JwtConfig>, db: Database, lifetimes: TokenLifetimes) -> Self {
        Self { jwt, db, lifetimes }
    }

    pub fn lifetimes(&self) -> &TokenLifetimes {
        &self.lifetimes
    }

    /// Sign an access token for the user. No side effects.
    pub fn issue_access_token(&self, user: &User) -> Result<String, IssueError> {
        let result = self
            .jwt
            .generate_access_token(&user.uuid, &user.email, user.role)?;
        Ok(result.token)
    }

    fn new_refresh_token(
        &self,
        user_id: i64,
        extended: bool,
        now: u64,
    ) -> NewRefreshToken {
        NewRefreshToken {
            token: random_token(),
            user_id,
            extended,
            issued_at: now,
            expires_at: now + self.lifetimes.refresh_for(extended),
        }
    }

    /// Create and persist a refresh token for the user.
    pub async fn issue_refresh_token(
        &self,
        user_id: i64,
        extended: bool,
    ) -> Result<String, IssueError> {
        let now = unix_now()?;
        let token = self.new_refresh_token(user_id, extended, now);
        self.db.refresh_tokens().create(&token).await?;
        Ok(token.token)
    }

    /// Start a session after the user authenticated by any method.
    ///
    /// This is the single issuance path for password and OAuth logins.
    pub async fn issue_session(
        &self,
        user: &User,
        method: AuthMethod,
        remember_me: bool,
    ) -> Result<TokenPair, IssueError> {
        let access_token = self.issue_access_token(user)?;
        let refresh_token = self.issue_refresh_token(user.id, remember_me).await?;
        self.db.users().touch_last_login(user.id).await?;

        info!(
            user_id = user.id,
            method = %method,
            extended = remember_me,
            "Session issued"
        );

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// The presented token is revoked and its replacement inserted in one
    /// transaction. The replacement keeps the lifetime policy of the original.
    pub async fn rotate(&self, refresh_token: &str) -> Result<TokenPair, IssueError> {
        let now = unix_now()?;

        let rotated = self
            .db
            .refresh_tokens()
            .rotate(refresh_token, now, |user_id, extended| {
                self.new_refresh_token(user_id, extended, now)
            })
            .await?
            .ok_or(IssueError::InvalidRefreshToken)?;

        let user = self
            .db
            .users()
            .get_by_id(rotated.user_id)
            .await?
            .ok_or(IssueError::UserNotFound)?;

        let access_token = self.issue_access_token(&user)?;

        info!(user_id = user.id, "Refresh token rotated");

        Ok(TokenPair {
            access_token,
            refresh_token: rotated.replacement.token,
        })
    }

    /// Revoke one refresh token. Returns true if it was active.
    pub async fn revoke(&self, refresh_token: &str) -> Result<bool, IssueError> {
        let now = unix_now()?;
        Ok(self.db.refresh_tokens().revoke(refresh_token, now).await?)
    }

    /// Revoke every refresh token of a user. Returns the number revoked.
    pub async fn revoke_all(&self, user_id: i64) -> Result<u64, IssueError> {
        let now = unix_now()?;
        let count = self
            .db
            .refresh_tokens()
            .revoke_all_for_user(user_id, now)
            .await?;
        info!(user_id, count, "Revoked all refresh tokens");
        Ok(count)
    }
}
