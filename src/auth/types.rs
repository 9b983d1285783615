//! Authentication user types.

use crate::db::UserRole;

/// Identity attached to a request after the access token was validated and
/// the account was found.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// Database user ID
    pub user_id: i64,
    /// Public user ID (the token subject)
    pub uuid: String,
    pub email: String,
    /// Role as currently stored, not as captured in the token
    pub role: UserRole,
}
