mod admin;
mod auth;
mod error;
mod oauth;
mod response;
mod validation;

use axum::Router;
use std::sync::Arc;

use crate::auth::TokenIssuer;
use crate::db::Database;
use crate::jwt::JwtConfig;
use crate::oauth::{OAuthClient, OAuthConfig};
use crate::rate_limit::RateLimitConfig;

pub use admin::AdminState;
pub use auth::AuthState;
pub use error::{ApiError, ApiJson, FieldError, ResultExt};
pub use response::ApiResponse;

/// Create the API router with `/auth` and `/admin` mounted.
pub fn create_api_router(
    db: Database,
    jwt: Arc<JwtConfig>,
    issuer: Arc<TokenIssuer>,
    oauth: OAuthConfig,
    client_url: String,
    rate_limit: Arc<RateLimitConfig>,
) -> Router {
    let auth_state = auth::AuthState {
        db: db.clone(),
        jwt: jwt.clone(),
        issuer: issuer.clone(),
        oauth: Arc::new(oauth),
        oauth_client: OAuthClient::new(),
        client_url,
    };

    let admin_state = admin::AdminState { db, jwt, issuer };

    Router::new()
        .nest("/auth", auth::router(auth_state, rate_limit))
        .nest("/admin", admin::router(admin_state))
}
