//! Token authentication with role-based access control.
//!
//! Two kinds of tokens: short-lived access tokens (15 min, stateless JWTs sent
//! as `Authorization: Bearer`) and long-lived opaque refresh tokens (7 days, or
//! 30 with "remember me", stored in the database). Refresh tokens are rotated
//! on every use.

mod bearer;
mod errors;
mod extractors;
mod ip;
mod issuer;
mod password;
mod state;
mod types;

pub use bearer::bearer_token;
pub use errors::AuthErrorKind;
pub use extractors::{
    AdminOnly, AnyRole, Auth, ModeratorOrAdmin, OptionalAuth, RoleConstraint,
    authenticate_request,
};
pub use ip::{HasHeadersAndExtensions, extract_client_ip};
pub use issuer::{
    AuthMethod, DEFAULT_EXTENDED_REFRESH_TOKEN_SECS, DEFAULT_REFRESH_TOKEN_SECS, IssueError,
    TokenIssuer, TokenLifetimes, TokenPair, random_token,
};
pub use password::{hash_password, hash_password_async, verify_password, verify_password_async};
pub use state::HasAuthBackend;
pub use types::AuthenticatedUser;
