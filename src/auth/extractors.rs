//! Axum extractors for authentication.

use std::marker::PhantomData;

use axum::{extract::FromRequestParts, http::request::Parts};

use super::bearer::bearer_token;
use super::errors::{AuthErrorKind, db_failure};
use super::state::HasAuthBackend;
use super::types::AuthenticatedUser;
use crate::api::ApiError;
use crate::db::UserRole;
use crate::jwt::JwtError;

/// Core authentication logic shared by all extractors.
///
/// Validates the bearer access token and resolves the account it names. The
/// account lookup catches users deleted after the token was issued, and the
/// role returned is the stored one.
pub async fn authenticate_request<S>(
    parts: &Parts,
    state: &S,
) -> Result<AuthenticatedUser, AuthErrorKind>
where
    S: HasAuthBackend + Send + Sync,
{
    let token = bearer_token(&parts.headers).ok_or(AuthErrorKind::NotAuthenticated)?;

    let claims = state
        .jwt()
        .validate_access_token(token)
        .map_err(|e| match e {
            JwtError::Expired => AuthErrorKind::TokenExpired,
            _ => AuthErrorKind::InvalidToken,
        })?;

    let user = state
        .db()
        .users()
        .get_by_uuid(&claims.sub)
        .await
        .map_err(|e| db_failure("Failed to get user", e))?
        .ok_or(AuthErrorKind::UserNotFound)?;

    Ok(AuthenticatedUser {
        user_id: user.id,
        uuid: user.uuid,
        email: user.email,
        role: user.role,
    })
}

// =============================================================================
// Role constraints
// =============================================================================

/// Set of roles allowed through an [`Auth`] extractor.
pub trait RoleConstraint: Send + Sync + 'static {
    fn allows(role: UserRole) -> bool;
}

/// Any authenticated user.
pub struct AnyRole;

impl RoleConstraint for AnyRole {
    fn allows(_role: UserRole) -> bool {
        true
    }
}

/// Administrators only.
pub struct AdminOnly;

impl RoleConstraint for AdminOnly {
    fn allows(role: UserRole) -> bool {
        role == UserRole::Admin
    }
}

/// Moderators and administrators.
pub struct ModeratorOrAdmin;

impl RoleConstraint for ModeratorOrAdmin {
    fn allows(role: UserRole) -> bool {
        matches!(role, UserRole::Moderator | UserRole::Admin)
    }
}

// =============================================================================
// Extractors
// =============================================================================

/// Extractor for endpoints that require authentication.
///
/// `Auth` alone accepts any role; `Auth<AdminOnly>` and friends reject other
/// roles with 403 after authentication succeeded.
pub struct Auth<R: RoleConstraint = AnyRole> {
    pub user: AuthenticatedUser,
    _role: PhantomData<R>,
}

impl<S, R> FromRequestParts<S> for Auth<R>
where
    S: HasAuthBackend + Send + Sync,
    R: RoleConstraint,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = authenticate_request(parts, state).await?;
        if !R::allows(user.role) {
            return Err(AuthErrorKind::InsufficientRole.into());
        }
        Ok(Auth {
            user,
            _role: PhantomData,
        })
    }
}

/// Optional authentication extractor. Never fails; any authentication error
/// is treated as an anonymous request.
pub struct OptionalAuth(pub Option<AuthenticatedUser>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalAuth(authenticate_request(parts, state).await.ok()))
    }
}
