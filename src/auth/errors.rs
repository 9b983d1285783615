//! Authentication error types.

use tracing::error;

use crate::api::ApiError;

/// Internal auth error kind used by the core authentication logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    NotAuthenticated,
    InvalidToken,
    TokenExpired,
    UserNotFound,
    InsufficientRole,
    DatabaseError,
}

impl AuthErrorKind {
    fn message(&self) -> &'static str {
        match self {
            AuthErrorKind::NotAuthenticated => "Access token required",
            AuthErrorKind::InvalidToken => "Invalid token",
            AuthErrorKind::TokenExpired => "Token expired",
            AuthErrorKind::UserNotFound => "User not found",
            AuthErrorKind::InsufficientRole => "Insufficient permissions",
            AuthErrorKind::DatabaseError => "Internal server error",
        }
    }
}

impl From<AuthErrorKind> for ApiError {
    fn from(kind: AuthErrorKind) -> Self {
        match kind {
            AuthErrorKind::NotAuthenticated
            | AuthErrorKind::InvalidToken
            | AuthErrorKind::TokenExpired
            | AuthErrorKind::UserNotFound => ApiError::unauthorized(kind.message()),
            AuthErrorKind::InsufficientRole => ApiError::forbidden(kind.message()),
            AuthErrorKind::DatabaseError => ApiError::Internal(kind.message().into()),
        }
    }
}

/// Log a storage failure hit while authenticating and map it to an error kind.
pub(super) fn db_failure(context: &str, e: impl std::fmt::Display) -> AuthErrorKind {
    error!("{}: {}", context, e);
    AuthErrorKind::DatabaseError
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_expired_and_invalid_are_both_unauthorized() {
        let expired = ApiError::from(AuthErrorKind::TokenExpired);
        let invalid = ApiError::from(AuthErrorKind::InvalidToken);
        assert_eq!(expired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(invalid.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(expired.code(), invalid.code());
    }

    #[test]
    fn test_insufficient_role_is_forbidden() {
        let err = ApiError::from(AuthErrorKind::InsufficientRole);
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.code(), "AUTHORIZATION_ERROR");
    }
}
