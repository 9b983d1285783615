//! Bearer token parsing for the `Authorization` header.

use axum::http::{HeaderMap, header};

/// Extract the token from an `Authorization: Bearer <token>` header.
///
/// The scheme is matched case-insensitively. Returns None when the header is
/// missing, uses another scheme, or carries an empty token.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() { None } else { Some(token) }
}
