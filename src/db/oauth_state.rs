use sqlx::sqlite::SqlitePool;

/// Store for pending OAuth authorization requests.
///
/// A state value is created when the user is redirected to the provider and
/// consumed exactly once by the callback. Entries expire after 10 minutes.
#[derive(Clone)]
pub struct OAuthStateStore {
    pool: SqlitePool,
}

impl OAuthStateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Remember a state value issued for `provider`.
    pub async fn store(&self, state: &str, provider: &str) -> Result<(), sqlx::Error> {
        self.cleanup_expired().await?;

        sqlx::query(
            "INSERT OR REPLACE INTO oauth_states (state, provider, created_at)
             VALUES (?, ?, datetime('now'))",
        )
        .bind(state)
        .bind(provider)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Consume a state value, returning the provider it was issued for.
    ///
    /// Returns None if the state is unknown or has expired.
    pub async fn take(&self, state: &str) -> Result<Option<String>, sqlx::Error> {
        self.cleanup_expired().await?;

        let row: Option<(String,)> =
            sqlx::query_as("DELETE FROM oauth_states WHERE state = ? RETURNING provider")
                .bind(state)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(provider,)| provider))
    }

    /// Remove states older than 10 minutes.
    pub async fn cleanup_expired(&self) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM oauth_states WHERE created_at < datetime('now', '-10 minutes')")
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
