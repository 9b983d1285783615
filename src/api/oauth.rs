//! OAuth sign-in endpoints.
//!
//! - GET `/google`, `/github` - Redirect to the provider
//! - GET `/google/callback`, `/github/callback` - Finish sign-in and redirect
//!   to the client with the token pair in the query string

use axum::{
    Router,
    extract::{Query, State},
    response::{IntoResponse, Redirect},
    routing::get,
};
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use super::auth::{AuthState, issue_err};
use super::error::{ApiError, ResultExt};
use crate::auth::{AuthMethod, random_token};
use crate::db::{NewUser, User};
use crate::oauth::{OAuthProvider, ProviderProfile};

pub(super) fn router() -> Router<AuthState> {
    Router::new()
        .route("/google", get(google_start))
        .route("/google/callback", get(google_callback))
        .route("/github", get(github_start))
        .route("/github/callback", get(github_callback))
}

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

async fn google_start(State(state): State<AuthState>) -> Result<Redirect, ApiError> {
    start(&state, OAuthProvider::Google).await
}

async fn github_start(State(state): State<AuthState>) -> Result<Redirect, ApiError> {
    start(&state, OAuthProvider::Github).await
}

async fn google_callback(
    State(state): State<AuthState>,
    Query(params): Query<CallbackParams>,
) -> Result<impl IntoResponse, ApiError> {
    callback(&state, OAuthProvider::Google, params).await
}

async fn github_callback(
    State(state): State<AuthState>,
    Query(params): Query<CallbackParams>,
) -> Result<impl IntoResponse, ApiError> {
    callback(&state, OAuthProvider::Github, params).await
}

/// Remember a fresh state value and send the browser to the provider.
async fn start(state: &AuthState, provider: OAuthProvider) -> Result<Redirect, ApiError> {
    let config = state
        .oauth
        .provider(provider)
        .ok_or_else(|| ApiError::not_found("OAuth provider not configured"))?;

    let oauth_state = random_token();
    state
        .db
        .oauth_states()
        .store(&oauth_state, provider.as_str())
        .await
        .db_err("Failed to store OAuth state")?;

    let url = state
        .oauth_client
        .authorize_url(provider, config, &oauth_state)
        .internal_err("Failed to build authorize URL")?;

    Ok(Redirect::temporary(url.as_str()))
}

async fn callback(
    state: &AuthState,
    provider: OAuthProvider,
    params: CallbackParams,
) -> Result<Redirect, ApiError> {
    let config = state
        .oauth
        .provider(provider)
        .ok_or_else(|| ApiError::not_found("OAuth provider not configured"))?;

    // The state must have been issued by us, for this provider, and not used before
    let issued_for = match params.state.as_deref() {
        Some(s) => state
            .db
            .oauth_states()
            .take(s)
            .await
            .db_err("Failed to check OAuth state")?,
        None => None,
    };
    if issued_for.as_deref() != Some(provider.as_str()) {
        return Err(ApiError::unauthorized("Invalid OAuth state"));
    }

    let code = match (params.error, params.code) {
        (None, Some(code)) => code,
        (error, _) => {
            warn!(provider = provider.as_str(), error = ?error, "Provider denied authorization");
            return failure_redirect(&state.client_url);
        }
    };

    let profile = match state
        .oauth_client
        .authenticate(provider, config, &code)
        .await
    {
        Ok(profile) => profile,
        Err(e) => {
            warn!(provider = provider.as_str(), error = %e, "OAuth exchange failed");
            return failure_redirect(&state.client_url);
        }
    };

    let user = upsert_user(state, provider, &profile).await?;

    let tokens = state
        .issuer
        .issue_session(&user, AuthMethod::OAuth(provider), false)
        .await
        .map_err(issue_err)?;

    let mut url = callback_url(&state.client_url)?;
    url.query_pairs_mut()
        .append_pair("token", &tokens.access_token)
        .append_pair("refresh", &tokens.refresh_token);

    Ok(Redirect::temporary(url.as_str()))
}

/// Find the account for a provider identity, linking or creating as needed.
///
/// Matched by provider ID first, then by email. Accounts created here are
/// email-verified and have no password.
async fn upsert_user(
    state: &AuthState,
    provider: OAuthProvider,
    profile: &ProviderProfile,
) -> Result<User, ApiError> {
    let users = state.db.users();
    let account_provider = provider.account_provider();

    if let Some(user) = users
        .get_by_provider(account_provider, &profile.provider_id)
        .await
        .db_err("Failed to look up user")?
    {
        return Ok(user);
    }

    let email = profile.email.trim().to_lowercase();

    if let Some(user) = users
        .get_by_email(&email)
        .await
        .db_err("Failed to look up user")?
    {
        users
            .link_provider(user.id, account_provider, &profile.provider_id)
            .await
            .db_err("Failed to link provider")?;
        info!(user_id = user.id, provider = provider.as_str(), "Linked OAuth provider");
        return users
            .get_by_id(user.id)
            .await
            .db_err("Failed to load user")?
            .ok_or_else(|| ApiError::internal("User vanished after linking"));
    }

    let uuid = Uuid::new_v4().to_string();
    let id = users
        .create(&NewUser {
            uuid: &uuid,
            email: &email,
            password_hash: None,
            first_name: profile.first_name.as_deref(),
            last_name: profile.last_name.as_deref(),
            provider: account_provider,
            provider_id: Some(&profile.provider_id),
            email_verified: true,
        })
        .await
        .db_err("Failed to create user")?;
    info!(user_id = id, provider = provider.as_str(), "New user registered via OAuth");

    users
        .get_by_id(id)
        .await
        .db_err("Failed to load user")?
        .ok_or_else(|| ApiError::internal("User vanished after creation"))
}

fn callback_url(client_url: &str) -> Result<Url, ApiError> {
    Url::parse(&format!("{}/auth/callback", client_url.trim_end_matches('/')))
        .internal_err("Invalid client URL")
}

fn failure_redirect(client_url: &str) -> Result<Redirect, ApiError> {
    let mut url = callback_url(client_url)?;
    url.query_pairs_mut().append_pair("error", "oauth_failed");
    Ok(Redirect::temporary(url.as_str()))
}
