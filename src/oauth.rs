//! OAuth 2.0 authorization code flow for Google and GitHub.
//!
//! The server only needs three calls per provider: build the authorize URL,
//! exchange the returned code for a provider access token, and read the
//! user's profile with it. Endpoints are configurable so tests can point them
//! at a local fake provider.

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::db::AuthProvider;

/// Supported external identity providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OAuthProvider {
    Google,
    Github,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Github => "github",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "google" => Some(OAuthProvider::Google),
            "github" => Some(OAuthProvider::Github),
            _ => None,
        }
    }

    /// Account provider recorded on users created or linked through this provider.
    pub fn account_provider(&self) -> AuthProvider {
        match self {
            OAuthProvider::Google => AuthProvider::Google,
            OAuthProvider::Github => AuthProvider::Github,
        }
    }

    fn scope(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "openid email profile",
            OAuthProvider::Github => "read:user user:email",
        }
    }
}

/// Client registration and endpoints for one provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Our callback URL as registered with the provider
    pub redirect_url: String,
    pub authorize_url: String,
    pub token_url: String,
    pub profile_url: String,
    /// GitHub only: list of the user's addresses, used when the profile hides the email
    pub emails_url: Option<String>,
}

impl ProviderConfig {
    /// Google endpoints with the given client registration.
    pub fn google(client_id: String, client_secret: String, redirect_url: String) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_url,
            authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".into(),
            token_url: "https://oauth2.googleapis.com/token".into(),
            profile_url: "https://openidconnect.googleapis.com/v1/userinfo".into(),
            emails_url: None,
        }
    }

    /// GitHub endpoints with the given client registration.
    pub fn github(client_id: String, client_secret: String, redirect_url: String) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_url,
            authorize_url: "https://github.com/login/oauth/authorize".into(),
            token_url: "https://github.com/login/oauth/access_token".into(),
            profile_url: "https://api.github.com/user".into(),
            emails_url: Some("https://api.github.com/user/emails".into()),
        }
    }

    /// Point every endpoint at `base` (used against a fake provider).
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.authorize_url = format!("{}/authorize", base);
        self.token_url = format!("{}/token", base);
        self.profile_url = format!("{}/user", base);
        if self.emails_url.is_some() {
            self.emails_url = Some(format!("{}/user/emails", base));
        }
        self
    }
}

/// OAuth providers enabled on this server.
#[derive(Debug, Clone, Default)]
pub struct OAuthConfig {
    pub google: Option<ProviderConfig>,
    pub github: Option<ProviderConfig>,
}

impl OAuthConfig {
    pub fn provider(&self, provider: OAuthProvider) -> Option<&ProviderConfig> {
        match provider {
            OAuthProvider::Google => self.google.as_ref(),
            OAuthProvider::Github => self.github.as_ref(),
        }
    }
}

/// Identity reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    /// Stable account ID at the provider
    pub provider_id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid provider URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Provider rejected the request: {0}")]
    Rejected(String),

    #[error("Provider did not return a verified email")]
    NoEmail,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct GoogleUser {
    sub: String,
    email: Option<String>,
    email_verified: Option<bool>,
    given_name: Option<String>,
    family_name: Option<String>,
}

#[derive(Deserialize)]
struct GithubUser {
    id: i64,
    login: String,
    name: Option<String>,
    email: Option<String>,
}

#[derive(Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

const USER_AGENT: &str = concat!("tokengate/", env!("CARGO_PKG_VERSION"));

/// Thin HTTP client for the provider calls.
#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
}

impl Default for OAuthClient {
    fn default() -> Self {
        Self::new()
    }
}

impl OAuthClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self { http }
    }

    /// URL to send the user's browser to.
    pub fn authorize_url(
        &self,
        provider: OAuthProvider,
        config: &ProviderConfig,
        state: &str,
    ) -> Result<Url, OAuthError> {
        let mut url = Url::parse(&config.authorize_url)?;
        url.query_pairs_mut()
            .append_pair("client_id", &config.client_id)
            .append_pair("redirect_uri", &config.redirect_url)
            .append_pair("response_type", "code")
            .append_pair("scope", provider.scope())
            .append_pair("state", state);
        Ok(url)
    }

    /// Exchange an authorization code and read the user's profile.
    pub async fn authenticate(
        &self,
        provider: OAuthProvider,
        config: &ProviderConfig,
        code: &str,
    ) -> Result<ProviderProfile, OAuthError> {
        let access_token = self.exchange_code(config, code).await?;
        match provider {
            OAuthProvider::Google => self.google_profile(config, &access_token).await,
            OAuthProvider::Github => self.github_profile(config, &access_token).await,
        }
    }

    async fn exchange_code(
        &self,
        config: &ProviderConfig,
        code: &str,
    ) -> Result<String, OAuthError> {
        let response: TokenResponse = self
            .http
            .post(&config.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", config.client_id.as_str()),
                ("client_secret", config.client_secret.as_str()),
                ("redirect_uri", config.redirect_url.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match response.access_token {
            Some(token) => Ok(token),
            None => Err(OAuthError::Rejected(
                response
                    .error_description
                    .or(response.error)
                    .unwrap_or_else(|| "no access token".into()),
            )),
        }
    }

    async fn google_profile(
        &self,
        config: &ProviderConfig,
        access_token: &str,
    ) -> Result<ProviderProfile, OAuthError> {
        let user: GoogleUser = self
            .http
            .get(&config.profile_url)
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let email = match (user.email, user.email_verified) {
            (Some(email), Some(true)) => email,
            _ => return Err(OAuthError::NoEmail),
        };

        Ok(ProviderProfile {
            provider_id: user.sub,
            email,
            first_name: user.given_name,
            last_name: user.family_name,
        })
    }

    async fn github_profile(
        &self,
        config: &ProviderConfig,
        access_token: &str,
    ) -> Result<ProviderProfile, OAuthError> {
        let user: GithubUser = self
            .http
            .get(&config.profile_url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let email = match user.email {
            Some(email) => email,
            None => self.github_primary_email(config, access_token).await?,
        };

        // GitHub has a single display name; split it like "First Last Names"
        let display = user.name.unwrap_or(user.login);
        let (first_name, last_name) = match display.split_once(' ') {
            Some((first, rest)) => (Some(first.to_string()), Some(rest.trim().to_string())),
            None => (Some(display), None),
        };

        Ok(ProviderProfile {
            provider_id: user.id.to_string(),
            email,
            first_name,
            last_name,
        })
    }

    async fn github_primary_email(
        &self,
        config: &ProviderConfig,
        access_token: &str,
    ) -> Result<String, OAuthError> {
        let Some(emails_url) = config.emails_url.as_deref() else {
            return Err(OAuthError::NoEmail);
        };

        let emails: Vec<GithubEmail> = self
            .http
            .get(emails_url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        emails
            .into_iter()
            .find(|e| e.primary && e.verified)
            .map(|e| e.email)
            .ok_or(OAuthError::NoEmail)
    }
}
