use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

/// User role for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    User,
    Moderator,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "USER",
            UserRole::Moderator => "MODERATOR",
            UserRole::Admin => "ADMIN",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "ADMIN" => UserRole::Admin,
            "MODERATOR" => UserRole::Moderator,
            _ => UserRole::User,
        }
    }
}

/// How an account was originally created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthProvider {
    Email,
    Google,
    Github,
}

impl AuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthProvider::Email => "EMAIL",
            AuthProvider::Google => "GOOGLE",
            AuthProvider::Github => "GITHUB",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "GOOGLE" => AuthProvider::Google,
            "GITHUB" => AuthProvider::Github,
            _ => AuthProvider::Email,
        }
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub uuid: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: UserRole,
    pub email_verified: bool,
    pub provider: AuthProvider,
    pub provider_id: Option<String>,
    pub last_login_at: Option<String>,
    pub created_at: String,
}

impl User {
    /// Public view of the user, safe to return to clients.
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.uuid.clone(),
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            role: self.role,
            is_email_verified: self.email_verified,
            provider: self.provider,
            last_login_at: self.last_login_at.clone(),
            created_at: self.created_at.clone(),
        }
    }
}

/// User data returned by the API. Never carries secrets or internal IDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: UserRole,
    pub is_email_verified: bool,
    pub provider: AuthProvider,
    pub last_login_at: Option<String>,
    pub created_at: String,
}

/// Fields required to insert a user.
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub uuid: &'a str,
    pub email: &'a str,
    pub password_hash: Option<&'a str>,
    pub first_name: Option<&'a str>,
    pub last_name: Option<&'a str>,
    pub provider: AuthProvider,
    pub provider_id: Option<&'a str>,
    pub email_verified: bool,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    uuid: String,
    email: String,
    password_hash: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    role: String,
    email_verified: i32,
    provider: String,
    provider_id: Option<String>,
    last_login_at: Option<String>,
    created_at: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            uuid: row.uuid,
            email: row.email,
            password_hash: row.password_hash,
            first_name: row.first_name,
            last_name: row.last_name,
            role: UserRole::from_str(&row.role),
            email_verified: row.email_verified != 0,
            provider: AuthProvider::from_str(&row.provider),
            provider_id: row.provider_id,
            last_login_at: row.last_login_at,
            created_at: row.created_at,
        }
    }
}

const USER_COLUMNS: &str = "id, uuid, email, password_hash, first_name, last_name, role, \
     email_verified, provider, provider_id, last_login_at, created_at";

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new user. Returns the user ID.
    pub async fn create(&self, user: &NewUser<'_>) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO users (uuid, email, password_hash, first_name, last_name, provider, provider_id, email_verified)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user.uuid)
        .bind(user.email)
        .bind(user.password_hash)
        .bind(user.first_name)
        .bind(user.last_name)
        .bind(user.provider.as_str())
        .bind(user.provider_id)
        .bind(user.email_verified as i32)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        value: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        let sql = format!("SELECT {} FROM users WHERE {}", USER_COLUMNS, clause);
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by email (case-insensitive).
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        self.fetch_one_where("email = ?", email).await
    }

    /// Get a user by UUID.
    pub async fn get_by_uuid(&self, uuid: &str) -> Result<Option<User>, sqlx::Error> {
        self.fetch_one_where("uuid = ?", uuid).await
    }

    /// Get a user by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    /// Get a user linked to an external identity provider account.
    pub async fn get_by_provider(
        &self,
        provider: AuthProvider,
        provider_id: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM users WHERE provider = ? AND provider_id = ?",
            USER_COLUMNS
        );
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(provider.as_str())
            .bind(provider_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    /// Link an existing account to an external identity provider.
    /// Accounts signing in through a provider have a provider-verified email.
    pub async fn link_provider(
        &self,
        id: i64,
        provider: AuthProvider,
        provider_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET provider = ?, provider_id = ?, email_verified = 1 WHERE id = ?",
        )
        .bind(provider.as_str())
        .bind(provider_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a successful login.
    pub async fn touch_last_login(&self, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET last_login_at = datetime('now') WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Set the role for a user.
    pub async fn set_role(&self, id: i64, role: UserRole) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET role = ? WHERE id = ?")
            .bind(role.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace the password hash and drop any pending reset token.
    pub async fn set_password_hash(&self, id: i64, hash: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = ?, password_reset_token = NULL, password_reset_expires = NULL
             WHERE id = ?",
        )
        .bind(hash)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Store a new email verification token.
    pub async fn set_verify_token(&self, id: i64, token: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET email_verify_token = ? WHERE id = ?")
            .bind(token)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Mark the account owning `token` as verified. Returns the user if the token matched.
    pub async fn verify_email(&self, token: &str) -> Result<Option<User>, sqlx::Error> {
        let Some(user) = self.fetch_one_where("email_verify_token = ?", token).await? else {
            return Ok(None);
        };

        sqlx::query("UPDATE users SET email_verified = 1, email_verify_token = NULL WHERE id = ?")
            .bind(user.id)
            .execute(&self.pool)
            .await?;

        Ok(Some(User {
            email_verified: true,
            ..user
        }))
    }

    /// Store a password reset token valid until `expires_at` (Unix seconds).
    pub async fn set_reset_token(
        &self,
        id: i64,
        token: &str,
        expires_at: u64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET password_reset_token = ?, password_reset_expires = ? WHERE id = ?",
        )
        .bind(token)
        .bind(expires_at as i64)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Find the user owning an unexpired password reset token.
    pub async fn get_by_reset_token(
        &self,
        token: &str,
        now: u64,
    ) -> Result<Option<User>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM users WHERE password_reset_token = ? AND password_reset_expires > ?",
            USER_COLUMNS
        );
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(token)
            .bind(now as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    /// Drop reset tokens that can no longer be used.
    pub async fn cleanup_reset_tokens(&self, now: u64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET password_reset_token = NULL, password_reset_expires = NULL
             WHERE password_reset_expires IS NOT NULL AND password_reset_expires <= ?",
        )
        .bind(now as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete a user by ID.
    pub async fn delete(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
