//! HTTP client that owns the session and refreshes it transparently.
//!
//! Every authenticated call goes through [`AuthClient::request`]. When the
//! server answers 401 to a request sent with an access token, the client
//! refreshes once and retries the request once. Concurrent 401s share a
//! single refresh: the first caller performs it behind `refresh_gate`, the
//! rest see that the session generation moved on and reuse the new token.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock, broadcast, watch};
use tracing::{debug, info, warn};

use super::error::ClientError;
use super::session::{Session, SessionEvent, SessionState, SessionStore};
use crate::db::UserProfile;

/// Default bound on a single refresh call.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    message: Option<String>,
    error: Option<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    code: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionData {
    user: UserProfile,
    access_token: String,
    refresh_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenData {
    access_token: String,
    refresh_token: String,
}

#[derive(Deserialize)]
struct UserData {
    user: UserProfile,
}

#[derive(Deserialize)]
struct RevokedData {
    revoked: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest<'a> {
    email: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_name: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
    remember_me: bool,
}

/// Session plus a counter bumped on every change of tokens.
struct Inner {
    session: Option<Session>,
    generation: u64,
}

/// Authentication-aware API client.
pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
    inner: RwLock<Inner>,
    refresh_gate: Mutex<()>,
    state_tx: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    store: Arc<dyn SessionStore>,
    refresh_timeout: Duration,
}

impl AuthClient {
    /// Create a client for the server at `base_url`. Call [`restore`](Self::restore)
    /// to pick up a persisted session.
    pub fn new(
        base_url: impl Into<String>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let (state_tx, _) = watch::channel(SessionState::Anonymous);
        let (events, _) = broadcast::channel(16);

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            inner: RwLock::new(Inner {
                session: None,
                generation: 0,
            }),
            refresh_gate: Mutex::new(()),
            state_tx,
            events,
            store,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        })
    }

    /// Bound the refresh call. A refresh that takes longer counts as failed.
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    // =========================================================================
    // Observation
    // =========================================================================

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the current session.
    pub async fn session(&self) -> Option<Session> {
        self.inner.read().await.session.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner
            .read()
            .await
            .session
            .as_ref()
            .is_some_and(|s| s.authenticated)
    }

    fn transition(&self, next: SessionState) {
        let current = self.state();
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            warn!(?current, ?next, "Unexpected session state transition");
        }
        debug!(?current, ?next, "Session state");
        self.state_tx.send_replace(next);
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Load the persisted session and check it against `/auth/me`, refreshing
    /// if the access token expired. Any failure clears the session.
    ///
    /// Returns the signed-in user, or None when there was nothing to restore
    /// or the stored session is no longer valid.
    pub async fn restore(&self) -> Result<Option<UserProfile>, ClientError> {
        let Some(session) = self.store.load()? else {
            return Ok(None);
        };

        self.reset_local().await;
        self.transition(SessionState::Authenticating);
        {
            let mut inner = self.inner.write().await;
            inner.session = Some(session);
            inner.generation += 1;
        }
        self.transition(SessionState::Authenticated);

        match self.me().await {
            Ok(user) => {
                info!(user = %user.email, "Session restored");
                self.emit(SessionEvent::SignedIn);
                Ok(Some(user))
            }
            Err(ClientError::SessionExpired) => Ok(None),
            Err(e) => {
                warn!(error = %e, "Discarding stored session");
                self.clear_local(SessionEvent::SignedOut).await;
                match e {
                    ClientError::Api { status: 401, .. } => Ok(None),
                    e => Err(e),
                }
            }
        }
    }

    /// Sign in with email and password.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<UserProfile, ClientError> {
        self.begin_authenticating().await;
        let body = serde_json::to_value(LoginRequest {
            email,
            password,
            remember_me,
        })?;
        let result = self
            .send_anonymous::<SessionData>(Method::POST, "/auth/login", Some(&body))
            .await;
        self.finish_authenticating(result).await
    }

    /// Create an account and sign in.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<UserProfile, ClientError> {
        self.begin_authenticating().await;
        let body = serde_json::to_value(RegisterRequest {
            email,
            password,
            first_name,
            last_name,
        })?;
        let result = self
            .send_anonymous::<SessionData>(Method::POST, "/auth/register", Some(&body))
            .await;
        self.finish_authenticating(result).await
    }

    /// Adopt the token pair delivered to the OAuth callback page.
    pub async fn complete_oauth(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<UserProfile, ClientError> {
        self.begin_authenticating().await;
        let result = match self
            .send_once(Method::GET, "/auth/me", None, Some(access_token))
            .await
        {
            Ok(response) => parse_data::<UserData>(response).await.map(|d| SessionData {
                user: d.user,
                access_token: access_token.to_string(),
                refresh_token: refresh_token.to_string(),
            }),
            Err(e) => Err(e),
        };
        self.finish_authenticating(result).await
    }

    /// Revoke the refresh token on the server and clear the local session.
    ///
    /// The local session is cleared whatever the server answers.
    pub async fn logout(&self) {
        let session = self.inner.read().await.session.clone();
        if let Some(session) = session {
            let body = json!({ "refreshToken": session.refresh_token });
            match self
                .send_once(
                    Method::POST,
                    "/auth/logout",
                    Some(&body),
                    Some(&session.access_token),
                )
                .await
            {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => debug!(status = %response.status(), "Server logout rejected"),
                Err(e) => debug!(error = %e, "Server logout failed"),
            }
        }
        self.clear_local(SessionEvent::SignedOut).await;
    }

    /// Revoke every session of the user and clear the local one.
    pub async fn logout_all(&self) -> Result<u64, ClientError> {
        let result = self
            .post::<RevokedData, _>("/auth/logout-all", &json!({}))
            .await;
        self.clear_local(SessionEvent::SignedOut).await;
        result.map(|d| d.revoked)
    }

    /// Fetch the current user and refresh the stored snapshot.
    pub async fn me(&self) -> Result<UserProfile, ClientError> {
        let data: UserData = self.get("/auth/me").await?;

        let mut inner = self.inner.write().await;
        if let Some(session) = inner.session.as_mut() {
            session.user = Some(data.user.clone());
            if let Err(e) = self.store.save(session) {
                warn!(error = %e, "Failed to persist session");
            }
        }
        Ok(data.user)
    }

    // =========================================================================
    // Requests
    // =========================================================================

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let body = serde_json::to_value(body)?;
        self.request(Method::POST, path, Some(&body)).await
    }

    /// Send a request with the current access token and return the envelope's
    /// `data`. A 401 triggers at most one refresh and one retry.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, ClientError> {
        let response = self.execute(method, path, body).await?;
        parse_data(response).await
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response, ClientError> {
        let (token, generation) = {
            let inner = self.inner.read().await;
            (
                inner.session.as_ref().map(|s| s.access_token.clone()),
                inner.generation,
            )
        };

        let response = self
            .send_once(method.clone(), path, body, token.as_deref())
            .await?;

        // Without a token there is nothing to refresh
        if response.status() != StatusCode::UNAUTHORIZED || token.is_none() {
            return Ok(response);
        }

        let fresh = self.refresh_coalesced(generation).await?;

        // A second 401 is final
        self.send_once(method, path, body, Some(&fresh)).await
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        access_token: Option<&str>,
    ) -> Result<reqwest::Response, ClientError> {
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = access_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        Ok(builder.send().await?)
    }

    async fn send_anonymous<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, ClientError> {
        let response = self.send_once(method, path, body, None).await?;
        parse_data(response).await
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Refresh the session unless another caller already did so since
    /// `observed_generation`. Returns the access token to retry with.
    async fn refresh_coalesced(&self, observed_generation: u64) -> Result<String, ClientError> {
        let _gate = self.refresh_gate.lock().await;

        let refresh_token = {
            let inner = self.inner.read().await;
            if inner.generation != observed_generation {
                // Someone refreshed, logged in, or gave up while we waited
                return match inner.session.as_ref() {
                    Some(session) => Ok(session.access_token.clone()),
                    None => Err(ClientError::SessionExpired),
                };
            }
            match inner.session.as_ref() {
                Some(session) => session.refresh_token.clone(),
                None => return Err(ClientError::SessionExpired),
            }
        };

        self.transition(SessionState::Refreshing);

        let outcome = tokio::time::timeout(self.refresh_timeout, self.call_refresh(&refresh_token))
            .await
            .unwrap_or_else(|_| {
                warn!("Token refresh timed out");
                Err(ClientError::SessionExpired)
            });

        let mut inner = self.inner.write().await;

        // Logout or a new sign-in while the call was in flight owns the
        // session now; this result belongs to a session that no longer exists
        if inner.generation != observed_generation || inner.session.is_none() {
            drop(inner);
            debug!("Session replaced during refresh, discarding result");
            if let Ok(tokens) = outcome {
                self.revoke_orphaned(&tokens).await;
            }
            return Err(ClientError::SessionExpired);
        }

        match outcome {
            Ok(tokens) => {
                if let Some(session) = inner.session.as_mut() {
                    session.access_token = tokens.access_token.clone();
                    session.refresh_token = tokens.refresh_token;
                    if let Err(e) = self.store.save(session) {
                        warn!(error = %e, "Failed to persist refreshed session");
                    }
                }
                inner.generation += 1;
                self.transition(SessionState::Authenticated);
                drop(inner);

                self.emit(SessionEvent::Refreshed);
                info!("Session refreshed");
                Ok(tokens.access_token)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, clearing session");
                self.clear_locked(&mut inner);
                drop(inner);
                self.emit(SessionEvent::Expired);
                Err(ClientError::SessionExpired)
            }
        }
    }

    /// Best-effort server revocation of a pair nobody holds anymore.
    async fn revoke_orphaned(&self, tokens: &TokenData) {
        let body = json!({ "refreshToken": tokens.refresh_token });
        if let Err(e) = self
            .send_once(
                Method::POST,
                "/auth/logout",
                Some(&body),
                Some(&tokens.access_token),
            )
            .await
        {
            debug!(error = %e, "Failed to revoke discarded refresh token");
        }
    }

    async fn call_refresh(&self, refresh_token: &str) -> Result<TokenData, ClientError> {
        let body = json!({ "refreshToken": refresh_token });
        self.send_anonymous(Method::POST, "/auth/refresh", Some(&body))
            .await
    }

    // =========================================================================
    // Local state
    // =========================================================================

    async fn begin_authenticating(&self) {
        if self.state() != SessionState::Anonymous {
            self.reset_local().await;
        }
        self.transition(SessionState::Authenticating);
    }

    async fn finish_authenticating(
        &self,
        result: Result<SessionData, ClientError>,
    ) -> Result<UserProfile, ClientError> {
        let data = match result {
            Ok(data) => data,
            Err(e) => {
                self.transition(SessionState::Anonymous);
                return Err(e);
            }
        };

        let session = Session {
            access_token: data.access_token,
            refresh_token: data.refresh_token,
            user: Some(data.user.clone()),
            authenticated: true,
        };

        if let Err(e) = self.store.save(&session) {
            self.transition(SessionState::Anonymous);
            return Err(e);
        }

        {
            let mut inner = self.inner.write().await;
            inner.session = Some(session);
            inner.generation += 1;
        }
        self.transition(SessionState::Authenticated);
        self.emit(SessionEvent::SignedIn);
        info!(user = %data.user.email, "Signed in");
        Ok(data.user)
    }

    /// Drop any in-memory session without touching the store or emitting.
    async fn reset_local(&self) {
        let mut inner = self.inner.write().await;
        if inner.session.take().is_some() {
            inner.generation += 1;
        }
        drop(inner);
        self.state_tx.send_replace(SessionState::Anonymous);
    }

    /// Clear the session everywhere and announce why.
    async fn clear_local(&self, event: SessionEvent) {
        let mut inner = self.inner.write().await;
        self.clear_locked(&mut inner);
        drop(inner);
        self.emit(event);
    }

    /// Drop the session while the caller holds the write lock, so no sign-in
    /// can land between the check and the clear.
    fn clear_locked(&self, inner: &mut Inner) {
        inner.session = None;
        inner.generation += 1;
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear stored session");
        }
        self.transition(SessionState::Anonymous);
    }
}

/// Turn a response into the envelope's `data`, or an API error.
async fn parse_data<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        let envelope: Envelope<T> = response.json().await?;
        return envelope.data.ok_or(ClientError::MissingData);
    }

    let text = response.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&text) {
        Ok(body) => (
            body.error
                .map(|e| e.code)
                .unwrap_or_else(|| "UNKNOWN_ERROR".into()),
            body.message.unwrap_or_default(),
        ),
        Err(_) => ("UNKNOWN_ERROR".into(), text),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        code,
        message,
    })
}
