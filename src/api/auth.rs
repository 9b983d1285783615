//! Account and session endpoints.
//!
//! - POST `/register` - Create an email/password account and start a session
//! - POST `/login` - Start a session with email and password
//! - POST `/logout` - Revoke one refresh token
//! - POST `/logout-all` - Revoke every refresh token of the caller
//! - POST `/refresh` - Rotate a refresh token into a new pair
//! - GET `/me` - Current user
//! - GET `/status` - Authentication status, never fails
//! - GET `/sessions` - Active refresh sessions of the caller
//! - POST `/change-password`, `/verify-email`, `/resend-verification`,
//!   `/forgot-password`, `/reset-password` - Account maintenance

use axum::{Router, extract::State, middleware, response::IntoResponse, routing::{get, post}};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::error::{ApiError, ApiJson, FieldError, ResultExt};
use super::response::ApiResponse;
use super::validation::Validator;
use crate::auth::{
    Auth, AuthMethod, IssueError, OptionalAuth, TokenIssuer, TokenPair, hash_password_async,
    random_token, verify_password_async,
};
use crate::db::{AuthProvider, Database, NewUser, RefreshTokenRecord, UserProfile};
use crate::impl_has_auth_backend;
use crate::jwt::{JwtConfig, unix_now};
use crate::oauth::{OAuthClient, OAuthConfig};
use crate::rate_limit::{RateLimitConfig, rate_limit_auth};

/// Password reset tokens are valid for one hour.
const RESET_TOKEN_SECS: u64 = 60 * 60;

#[derive(Clone)]
pub struct AuthState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub issuer: Arc<TokenIssuer>,
    pub oauth: Arc<OAuthConfig>,
    pub oauth_client: OAuthClient,
    /// Frontend origin that OAuth callbacks redirect to
    pub client_url: String,
}

impl_has_auth_backend!(AuthState);

pub fn router(state: AuthState, rate_limit: Arc<RateLimitConfig>) -> Router {
    let limited = Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/verify-email", post(verify_email))
        .route("/resend-verification", post(resend_verification))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
        .route_layer(middleware::from_fn_with_state(rate_limit, rate_limit_auth));

    Router::new()
        .route("/logout", post(logout))
        .route("/logout-all", post(logout_all))
        .route("/me", get(me))
        .route("/status", get(status))
        .route("/sessions", get(list_sessions))
        .route("/change-password", post(change_password))
        .merge(limited)
        .merge(super::oauth::router())
        .with_state(state)
}

// =============================================================================
// Request and response bodies
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    email: String,
    password: String,
    first_name: Option<String>,
    last_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest {
    email: String,
    password: String,
    #[serde(default)]
    remember_me: bool,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangePasswordRequest {
    current_password: String,
    new_password: String,
}

#[derive(Deserialize)]
struct TokenRequest {
    token: String,
}

#[derive(Deserialize)]
struct EmailRequest {
    email: String,
}

#[derive(Deserialize)]
struct ResetPasswordRequest {
    token: String,
    password: String,
}

/// A user together with a freshly issued token pair.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionData {
    user: UserProfile,
    #[serde(flatten)]
    tokens: TokenPair,
}

#[derive(Serialize)]
struct UserData {
    user: UserProfile,
}

/// Public view of a refresh session. Never includes the token value.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SessionInfo {
    id: i64,
    remember_me: bool,
    created_at: i64,
    expires_at: i64,
}

impl From<RefreshTokenRecord> for SessionInfo {
    fn from(record: RefreshTokenRecord) -> Self {
        Self {
            id: record.id,
            remember_me: record.extended,
            created_at: record.created_at,
            expires_at: record.expires_at,
        }
    }
}

#[derive(Serialize)]
pub(super) struct SessionList {
    pub(super) sessions: Vec<SessionInfo>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusData {
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<UserProfile>,
}

/// Map issuer failures onto API errors. Every refresh failure the client can
/// cause looks the same.
pub(super) fn issue_err(e: IssueError) -> ApiError {
    match e {
        IssueError::InvalidRefreshToken | IssueError::UserNotFound => {
            ApiError::unauthorized("Invalid refresh token")
        }
        IssueError::Signing(e) => ApiError::internal_error("Failed to sign token", e),
        IssueError::Database(e) => ApiError::db_error("Failed to store token", e),
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|d| d.is_unique_violation())
}

// =============================================================================
// Handlers
// =============================================================================

/// Create an email/password account. The new user is signed in immediately.
async fn register(
    State(state): State<AuthState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut v = Validator::new();
    let email = v.email("email", &req.email);
    v.password("password", &req.password);
    let first_name = req.first_name.as_deref().map(|n| v.name("firstName", n));
    let last_name = req.last_name.as_deref().map(|n| v.name("lastName", n));
    v.finish()?;

    let existing = state
        .db
        .users()
        .get_by_email(&email)
        .await
        .db_err("Failed to look up user")?;
    if existing.is_some() {
        return Err(ApiError::conflict("User already exists"));
    }

    let password_hash = hash_password_async(req.password)
        .await
        .internal_err("Failed to hash password")?;

    let uuid = Uuid::new_v4().to_string();
    let id = state
        .db
        .users()
        .create(&NewUser {
            uuid: &uuid,
            email: &email,
            password_hash: Some(&password_hash),
            first_name: first_name.as_deref(),
            last_name: last_name.as_deref(),
            provider: AuthProvider::Email,
            provider_id: None,
            email_verified: false,
        })
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ApiError::conflict("User already exists")
            } else {
                ApiError::db_error("Failed to create user", e)
            }
        })?;

    let verify_token = random_token();
    state
        .db
        .users()
        .set_verify_token(id, &verify_token)
        .await
        .db_err("Failed to store verification token")?;
    info!(user_id = id, verification_token = %verify_token, "Email verification token issued");

    let user = state
        .db
        .users()
        .get_by_id(id)
        .await
        .db_err("Failed to load user")?
        .ok_or_else(|| ApiError::internal("User vanished after creation"))?;

    let tokens = state
        .issuer
        .issue_session(&user, AuthMethod::Password, false)
        .await
        .map_err(issue_err)?;

    info!(user_id = id, email = %user.email, "New user registered");

    Ok(ApiResponse::created(
        "User registered successfully",
        SessionData {
            user: user.profile(),
            tokens,
        },
    ))
}

/// Sign in with email and password. Never reveals whether the email exists.
async fn login(
    State(state): State<AuthState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut v = Validator::new();
    v.required("email", &req.email);
    v.required("password", &req.password);
    v.finish()?;

    let email = req.email.trim().to_lowercase();
    let user = state
        .db
        .users()
        .get_by_email(&email)
        .await
        .db_err("Failed to look up user")?;

    let stored_hash = user.as_ref().and_then(|u| u.password_hash.clone());
    let valid = verify_password_async(req.password, stored_hash).await;

    let user = match user {
        Some(user) if valid => user,
        _ => {
            warn!("Failed login attempt");
            return Err(ApiError::unauthorized("Invalid email or password"));
        }
    };

    let tokens = state
        .issuer
        .issue_session(&user, AuthMethod::Password, req.remember_me)
        .await
        .map_err(issue_err)?;

    Ok(ApiResponse::ok(
        "Login successful",
        SessionData {
            user: user.profile(),
            tokens,
        },
    ))
}

/// Revoke the given refresh token if it belongs to the caller.
async fn logout(
    State(state): State<AuthState>,
    Auth { user, .. }: Auth,
    body: Option<ApiJson<RefreshRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body.map(|ApiJson(req)| req).unwrap_or_default();
    if let Some(token) = req.refresh_token.as_deref() {
        let record = state
            .db
            .refresh_tokens()
            .get_by_token(token)
            .await
            .db_err("Failed to look up refresh token")?;

        if record.is_some_and(|r| r.user_id == user.user_id) {
            state.issuer.revoke(token).await.map_err(issue_err)?;
        }
    }

    info!(user_id = user.user_id, "User logged out");
    Ok(ApiResponse::ok("Logout successful", json!({})))
}

/// Revoke every refresh token of the caller.
async fn logout_all(
    State(state): State<AuthState>,
    Auth { user, .. }: Auth,
) -> Result<impl IntoResponse, ApiError> {
    let revoked = state
        .issuer
        .revoke_all(user.user_id)
        .await
        .map_err(issue_err)?;

    Ok(ApiResponse::ok(
        "Logged out from all sessions",
        json!({ "revoked": revoked }),
    ))
}

/// Exchange a refresh token for a new pair. The presented token stops working.
async fn refresh(
    State(state): State<AuthState>,
    body: Option<ApiJson<RefreshRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let token = body
        .and_then(|ApiJson(req)| req.refresh_token)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Refresh token required"))?;

    let tokens = state.issuer.rotate(&token).await.map_err(issue_err)?;

    Ok(ApiResponse::ok("Token refreshed successfully", tokens))
}

/// Current user.
async fn me(
    State(state): State<AuthState>,
    Auth { user, .. }: Auth,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .users()
        .get_by_id(user.user_id)
        .await
        .db_err("Failed to load user")?
        .ok_or_else(|| ApiError::unauthorized("User not found"))?;

    Ok(ApiResponse::ok(
        "User retrieved successfully",
        UserData {
            user: user.profile(),
        },
    ))
}

/// Whether the request carries a valid access token.
async fn status(
    State(state): State<AuthState>,
    OptionalAuth(auth): OptionalAuth,
) -> Result<impl IntoResponse, ApiError> {
    let user = match auth {
        Some(auth) => state
            .db
            .users()
            .get_by_id(auth.user_id)
            .await
            .db_err("Failed to load user")?
            .map(|u| u.profile()),
        None => None,
    };

    Ok(ApiResponse::ok(
        "Authentication status",
        StatusData {
            authenticated: user.is_some(),
            user,
        },
    ))
}

/// Active refresh sessions of the caller.
async fn list_sessions(
    State(state): State<AuthState>,
    Auth { user, .. }: Auth,
) -> Result<impl IntoResponse, ApiError> {
    let now = unix_now().internal_err("Failed to read clock")?;
    let sessions = state
        .db
        .refresh_tokens()
        .list_active_by_user(user.user_id, now)
        .await
        .db_err("Failed to list sessions")?;

    Ok(ApiResponse::ok(
        "Sessions retrieved successfully",
        SessionList {
            sessions: sessions.into_iter().map(SessionInfo::from).collect(),
        },
    ))
}

/// Replace the caller's password. Every session is revoked, including the
/// current one.
async fn change_password(
    State(state): State<AuthState>,
    Auth { user, .. }: Auth,
    ApiJson(req): ApiJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut v = Validator::new();
    v.required("currentPassword", &req.current_password);
    v.password("newPassword", &req.new_password);
    v.finish()?;

    let account = state
        .db
        .users()
        .get_by_id(user.user_id)
        .await
        .db_err("Failed to load user")?
        .ok_or_else(|| ApiError::unauthorized("User not found"))?;

    if !verify_password_async(req.current_password, account.password_hash).await {
        return Err(ApiError::validation(vec![FieldError::new(
            "currentPassword",
            "Current password is incorrect",
        )]));
    }

    let hash = hash_password_async(req.new_password)
        .await
        .internal_err("Failed to hash password")?;
    state
        .db
        .users()
        .set_password_hash(user.user_id, &hash)
        .await
        .db_err("Failed to update password")?;
    state
        .issuer
        .revoke_all(user.user_id)
        .await
        .map_err(issue_err)?;

    info!(user_id = user.user_id, "Password changed");
    Ok(ApiResponse::message("Password changed successfully"))
}

/// Consume an email verification token.
async fn verify_email(
    State(state): State<AuthState>,
    ApiJson(req): ApiJson<TokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut v = Validator::new();
    v.required("token", &req.token);
    v.finish()?;

    let user = state
        .db
        .users()
        .verify_email(&req.token)
        .await
        .db_err("Failed to verify email")?
        .ok_or_else(|| {
            ApiError::validation(vec![FieldError::new("token", "Invalid verification token")])
        })?;

    info!(user_id = user.id, "Email verified");
    Ok(ApiResponse::message("Email verified successfully"))
}

/// Issue a new verification token. Answers the same for unknown or already
/// verified addresses.
async fn resend_verification(
    State(state): State<AuthState>,
    ApiJson(req): ApiJson<EmailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut v = Validator::new();
    let email = v.email("email", &req.email);
    v.finish()?;

    let user = state
        .db
        .users()
        .get_by_email(&email)
        .await
        .db_err("Failed to look up user")?;

    if let Some(user) = user.filter(|u| !u.email_verified) {
        let token = random_token();
        state
            .db
            .users()
            .set_verify_token(user.id, &token)
            .await
            .db_err("Failed to store verification token")?;
        info!(user_id = user.id, verification_token = %token, "Email verification token issued");
    }

    Ok(ApiResponse::message(
        "If the account exists and is not verified, a verification email has been sent",
    ))
}

/// Start a password reset. Answers the same for unknown addresses.
async fn forgot_password(
    State(state): State<AuthState>,
    ApiJson(req): ApiJson<EmailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut v = Validator::new();
    let email = v.email("email", &req.email);
    v.finish()?;

    let user = state
        .db
        .users()
        .get_by_email(&email)
        .await
        .db_err("Failed to look up user")?;

    if let Some(user) = user {
        let now = unix_now().internal_err("Failed to read clock")?;
        let token = random_token();
        state
            .db
            .users()
            .set_reset_token(user.id, &token, now + RESET_TOKEN_SECS)
            .await
            .db_err("Failed to store reset token")?;
        info!(user_id = user.id, reset_token = %token, "Password reset token issued");
    }

    Ok(ApiResponse::message(
        "If an account with that email exists, a password reset link has been sent",
    ))
}

/// Set a new password with a reset token. Every session is revoked.
async fn reset_password(
    State(state): State<AuthState>,
    ApiJson(req): ApiJson<ResetPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut v = Validator::new();
    v.required("token", &req.token);
    v.password("password", &req.password);
    v.finish()?;

    let now = unix_now().internal_err("Failed to read clock")?;
    let user = state
        .db
        .users()
        .get_by_reset_token(&req.token, now)
        .await
        .db_err("Failed to look up reset token")?
        .ok_or_else(|| {
            ApiError::validation(vec![FieldError::new(
                "token",
                "Invalid or expired reset token",
            )])
        })?;

    let hash = hash_password_async(req.password)
        .await
        .internal_err("Failed to hash password")?;
    state
        .db
        .users()
        .set_password_hash(user.id, &hash)
        .await
        .db_err("Failed to update password")?;
    state.issuer.revoke_all(user.id).await.map_err(issue_err)?;

    info!(user_id = user.id, "Password reset");
    Ok(ApiResponse::message("Password reset successful"))
}
