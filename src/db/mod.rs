mod oauth_state;
mod token;
mod user;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

pub use oauth_state::OAuthStateStore;
pub use token::{NewRefreshToken, RefreshTokenRecord, RefreshTokenStore, RotatedToken};
pub use user::{AuthProvider, NewUser, User, UserProfile, UserRole, UserStore};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create a database at the given path.
    /// Use ":memory:" for an in-memory database.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let url = if path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", path)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Get the current schema version.
    async fn get_version(&self) -> Result<i32, sqlx::Error> {
        let result: Option<(i32,)> = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(result.map(|r| r.0).unwrap_or(0))
    }

    /// Set the schema version within a transaction.
    async fn set_version(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        version: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM schema_version")
            .execute(&mut **tx)
            .await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Run database migrations.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
            .execute(&self.pool)
            .await?;

        let version = self.get_version().await?;

        if version < 1 {
            self.migrate_v1().await?;
        }

        Ok(())
    }

    /// Execute a list of queries in a transaction, then set the version.
    async fn run_migration(
        &self,
        version: i32,
        queries: &[&'static str],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for query in queries {
            sqlx::query(*query).execute(&mut *tx).await?;
        }
        Self::set_version(&mut tx, version).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn migrate_v1(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            1,
            &[
                // Users table. Email uniqueness is case-insensitive.
                "CREATE TABLE users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT UNIQUE NOT NULL,
                    email TEXT UNIQUE NOT NULL COLLATE NOCASE,
                    password_hash TEXT,
                    first_name TEXT,
                    last_name TEXT,
                    role TEXT NOT NULL DEFAULT 'USER',
                    email_verified INTEGER NOT NULL DEFAULT 0,
                    email_verify_token TEXT,
                    password_reset_token TEXT,
                    password_reset_expires INTEGER,
                    provider TEXT NOT NULL DEFAULT 'EMAIL',
                    provider_id TEXT,
                    last_login_at TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )",
                "CREATE INDEX idx_users_uuid ON users(uuid)",
                "CREATE INDEX idx_users_verify_token ON users(email_verify_token)",
                "CREATE INDEX idx_users_reset_token ON users(password_reset_token)",
                "CREATE UNIQUE INDEX idx_users_provider ON users(provider, provider_id)
                    WHERE provider_id IS NOT NULL",
                // Refresh tokens. Times are Unix seconds.
                "CREATE TABLE refresh_tokens (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    token TEXT UNIQUE NOT NULL,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    extended INTEGER NOT NULL DEFAULT 0,
                    expires_at INTEGER NOT NULL,
                    revoked INTEGER NOT NULL DEFAULT 0,
                    revoked_at INTEGER,
                    created_at INTEGER NOT NULL
                )",
                "CREATE INDEX idx_refresh_tokens_user_id ON refresh_tokens(user_id)",
                "CREATE INDEX idx_refresh_tokens_expires_at ON refresh_tokens(expires_at)",
                // Pending OAuth authorization requests
                "CREATE TABLE oauth_states (
                    state TEXT PRIMARY KEY NOT NULL,
                    provider TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )",
                "CREATE INDEX idx_oauth_states_created_at ON oauth_states(created_at)",
            ],
        )
        .await
    }

    /// Get the user store.
    pub fn users(&self) -> UserStore {
        UserStore::new(self.pool.clone())
    }

    /// Get the refresh token store.
    pub fn refresh_tokens(&self) -> RefreshTokenStore {
        RefreshTokenStore::new(self.pool.clone())
    }

    /// Get the OAuth state store.
    pub fn oauth_states(&self) -> OAuthStateStore {
        OAuthStateStore::new(self.pool.clone())
    }

    /// Get the underlying connection pool (for tests that need raw SQL access).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> NewUser<'static> {
        NewUser {
            uuid: "uuid-123",
            email: "alice@example.com",
            password_hash: Some("hash"),
            first_name: Some("Alice"),
            last_name: Some("Liddell"),
            provider: AuthProvider::Email,
            provider_id: None,
            email_verified: false,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let db = Database::open(":memory:").await.unwrap();

        let id = db.users().create(&alice()).await.unwrap();

        let user = db
            .users()
            .get_by_email("alice@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.uuid, "uuid-123");
        assert_eq!(user.role, UserRole::User);
        assert!(!user.email_verified);

        let user = db.users().get_by_id(id).await.unwrap().unwrap();
        assert_eq!(user.email, "alice@example.com");

        let user = db.users().get_by_uuid("uuid-123").await.unwrap().unwrap();
        assert_eq!(user.id, id);
    }

    #[tokio::test]
    async fn test_email_lookup_is_case_insensitive() {
        let db = Database::open(":memory:").await.unwrap();
        db.users().create(&alice()).await.unwrap();

        let user = db.users().get_by_email("ALICE@Example.com").await.unwrap();
        assert!(user.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_email_fails() {
        let db = Database::open(":memory:").await.unwrap();

        db.users().create(&alice()).await.unwrap();
        let mut other = alice();
        other.uuid = "uuid-456";
        other.email = "Alice@Example.com";
        let result = db.users().create(&other).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_delete_user_cascades_refresh_tokens() {
        let db = Database::open(":memory:").await.unwrap();

        let id = db.users().create(&alice()).await.unwrap();
        db.refresh_tokens()
            .create(&NewRefreshToken {
                token: "tok".to_string(),
                user_id: id,
                extended: false,
                issued_at: 100,
                expires_at: 200,
            })
            .await
            .unwrap();

        db.users().delete(id).await.unwrap();

        assert!(db.users().get_by_id(id).await.unwrap().is_none());
        assert!(db.refresh_tokens().get_by_token("tok").await.unwrap().is_none());
    }
}
