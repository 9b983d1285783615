//! Admin API endpoints.
//!
//! Listing sessions is open to moderators; revoking them requires admin.

use axum::{
    Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::auth::{SessionInfo, SessionList, issue_err};
use super::error::{ApiError, FieldError, ResultExt};
use super::response::ApiResponse;
use crate::auth::{AdminOnly, Auth, ModeratorOrAdmin, TokenIssuer};
use crate::db::{Database, User};
use crate::impl_has_auth_backend;
use crate::jwt::{JwtConfig, unix_now};

/// State for admin endpoints.
#[derive(Clone)]
pub struct AdminState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub issuer: Arc<TokenIssuer>,
}

impl_has_auth_backend!(AdminState);

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/users/{id}/sessions", get(list_user_sessions))
        .route("/users/{id}/revoke-sessions", post(revoke_user_sessions))
        .with_state(state)
}

/// Validate a UUID string format.
fn validate_uuid(uuid: &str) -> Result<(), ApiError> {
    if uuid::Uuid::parse_str(uuid).is_err() {
        return Err(ApiError::validation(vec![FieldError::new(
            "id",
            "Invalid user ID",
        )]));
    }
    Ok(())
}

async fn load_user(db: &Database, uuid: &str) -> Result<User, ApiError> {
    validate_uuid(uuid)?;
    db.users()
        .get_by_uuid(uuid)
        .await
        .db_err("Failed to get user")?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

/// List another user's active sessions.
async fn list_user_sessions(
    State(state): State<AdminState>,
    _auth: Auth<ModeratorOrAdmin>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user = load_user(&state.db, &id).await?;
    let now = unix_now().internal_err("Failed to read clock")?;

    let sessions = state
        .db
        .refresh_tokens()
        .list_active_by_user(user.id, now)
        .await
        .db_err("Failed to list sessions")?;

    Ok(ApiResponse::ok(
        "Sessions retrieved successfully",
        SessionList {
            sessions: sessions.into_iter().map(SessionInfo::from).collect(),
        },
    ))
}

/// Revoke every session of a user, e.g. when banning the account.
///
/// Access tokens already issued stay valid until they expire.
async fn revoke_user_sessions(
    State(state): State<AdminState>,
    Auth { user: admin, .. }: Auth<AdminOnly>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user = load_user(&state.db, &id).await?;

    let revoked = state.issuer.revoke_all(user.id).await.map_err(issue_err)?;

    info!(admin_id = admin.user_id, user_id = user.id, revoked, "Admin revoked user sessions");
    Ok(ApiResponse::ok(
        "Sessions revoked",
        json!({ "revoked": revoked }),
    ))
}
