//! Refresh token storage with revocation and rotation.
//!
//! Only refresh tokens are stored. Access tokens are stateless and are never
//! looked up, so revoking a refresh token does not invalidate access tokens
//! that were already issued from it.

use sqlx::sqlite::SqlitePool;

/// A persisted refresh token record. Times are Unix seconds.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    pub id: i64,
    pub token: String,
    pub user_id: i64,
    pub extended: bool,
    pub expires_at: i64,
    pub revoked: bool,
    pub revoked_at: Option<i64>,
    pub created_at: i64,
}

impl RefreshTokenRecord {
    /// Whether the token can still be exchanged for a new pair.
    pub fn is_active(&self, now: u64) -> bool {
        !self.revoked && self.expires_at > now as i64
    }
}

/// A refresh token about to be persisted.
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub token: String,
    pub user_id: i64,
    pub extended: bool,
    pub issued_at: u64,
    pub expires_at: u64,
}

/// Outcome of a successful rotation.
#[derive(Debug, Clone)]
pub struct RotatedToken {
    /// Owner of both the revoked and the replacement token.
    pub user_id: i64,
    /// The token that was persisted in place of the revoked one.
    pub replacement: NewRefreshToken,
}

/// Store for managing refresh tokens.
pub struct RefreshTokenStore {
    pool: SqlitePool,
}

const TOKEN_COLUMNS: &str =
    "id, token, user_id, extended, expires_at, revoked, revoked_at, created_at";

impl RefreshTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a new refresh token.
    pub async fn create(&self, token: &NewRefreshToken) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO refresh_tokens (token, user_id, extended, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&token.token)
        .bind(token.user_id)
        .bind(token.extended)
        .bind(token.expires_at as i64)
        .bind(token.issued_at as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Look up a token by its exact value, whatever its state.
    pub async fn get_by_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, sqlx::Error> {
        let sql = format!("SELECT {} FROM refresh_tokens WHERE token = ?", TOKEN_COLUMNS);
        sqlx::query_as(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await
    }

    /// Revoke an active token and persist its replacement in one transaction.
    ///
    /// The revocation is a conditional update, so when two callers race with
    /// the same token exactly one of them observes an affected row. Returns
    /// `None` when the token is unknown, already revoked, or expired.
    ///
    /// `replacement` receives the owner ID and the `extended` flag of the
    /// revoked token and builds the token to insert.
    pub async fn rotate<F>(
        &self,
        token: &str,
        now: u64,
        replacement: F,
    ) -> Result<Option<RotatedToken>, sqlx::Error>
    where
        F: FnOnce(i64, bool) -> NewRefreshToken,
    {
        let mut tx = self.pool.begin().await?;

        let revoked: Option<(i64, bool)> = sqlx::query_as(
            "UPDATE refresh_tokens SET revoked = 1, revoked_at = ?
             WHERE token = ? AND revoked = 0 AND expires_at > ?
             RETURNING user_id, extended",
        )
        .bind(now as i64)
        .bind(token)
        .bind(now as i64)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((user_id, extended)) = revoked else {
            tx.rollback().await?;
            return Ok(None);
        };

        let next = replacement(user_id, extended);
        sqlx::query(
            "INSERT INTO refresh_tokens (token, user_id, extended, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&next.token)
        .bind(next.user_id)
        .bind(next.extended)
        .bind(next.expires_at as i64)
        .bind(next.issued_at as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(RotatedToken {
            user_id,
            replacement: next,
        }))
    }

    /// Revoke a single token. Returns true if it was active before the call.
    pub async fn revoke(&self, token: &str, now: u64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_at = ? WHERE token = ? AND revoked = 0",
        )
        .bind(now as i64)
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Revoke every non-revoked token of a user (logout everywhere).
    pub async fn revoke_all_for_user(&self, user_id: i64, now: u64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_at = ? WHERE user_id = ? AND revoked = 0",
        )
        .bind(now as i64)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// List the active refresh tokens of a user, newest first.
    pub async fn list_active_by_user(
        &self,
        user_id: i64,
        now: u64,
    ) -> Result<Vec<RefreshTokenRecord>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM refresh_tokens WHERE user_id = ? AND revoked = 0 AND expires_at > ?
             ORDER BY created_at DESC, id DESC",
            TOKEN_COLUMNS
        );
        sqlx::query_as(&sql)
            .bind(user_id)
            .bind(now as i64)
            .fetch_all(&self.pool)
            .await
    }

    /// Delete expired tokens and tokens revoked before `revoked_before`.
    pub async fn delete_stale(&self, now: u64, revoked_before: u64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM refresh_tokens WHERE expires_at <= ? OR (revoked = 1 AND revoked_at < ?)",
        )
        .bind(now as i64)
        .bind(revoked_before as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
