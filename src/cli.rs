//! CLI argument parsing, validation, and startup helpers.

use crate::ServerConfig;
use crate::auth::{DEFAULT_EXTENDED_REFRESH_TOKEN_SECS, DEFAULT_REFRESH_TOKEN_SECS, TokenLifetimes};
use crate::db::Database;
use crate::jwt::DEFAULT_ACCESS_TOKEN_SECS;
use crate::oauth::{OAuthConfig, ProviderConfig};
use crate::rate_limit::DEFAULT_AUTH_REQUESTS_PER_MINUTE;
use clap::Parser;
use std::num::NonZeroU32;
use tracing::{error, info, warn};
use url::Url;

const MIN_JWT_SECRET_LENGTH: usize = 32;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tokengate",
    about = "Token authentication service with rotating refresh tokens"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "5000")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, env = "DATABASE_PATH", default_value = "tokengate.db")]
    pub database: String,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Frontend origin that OAuth sign-ins redirect back to
    #[arg(long, env = "CLIENT_URL", default_value = "http://localhost:3000")]
    pub client_url: String,

    /// Public origin of this server, used to build OAuth callback URLs
    #[arg(long, env = "SERVER_URL", default_value = "http://localhost:5000")]
    pub server_url: String,

    /// Access token lifetime in seconds
    #[arg(long, default_value_t = DEFAULT_ACCESS_TOKEN_SECS)]
    pub access_token_secs: u64,

    /// Refresh token lifetime in seconds
    #[arg(long, default_value_t = DEFAULT_REFRESH_TOKEN_SECS)]
    pub refresh_token_secs: u64,

    /// Refresh token lifetime in seconds when "remember me" is set
    #[arg(long, default_value_t = DEFAULT_EXTENDED_REFRESH_TOKEN_SECS)]
    pub remember_me_secs: u64,

    /// Requests per minute per IP on credential endpoints (0 disables)
    #[arg(long, default_value_t = DEFAULT_AUTH_REQUESTS_PER_MINUTE)]
    pub auth_rate_limit: u32,

    /// Use the first X-Forwarded-For address as the client IP. Only enable behind a proxy
    #[arg(long)]
    pub trust_forwarded_for: bool,

    #[arg(long, env = "GOOGLE_CLIENT_ID")]
    pub google_client_id: Option<String>,

    #[arg(long, env = "GOOGLE_CLIENT_SECRET", hide_env_values = true)]
    pub google_client_secret: Option<String>,

    #[arg(long, env = "GITHUB_CLIENT_ID")]
    pub github_client_id: Option<String>,

    #[arg(long, env = "GITHUB_CLIENT_SECRET", hide_env_values = true)]
    pub github_client_secret: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load JWT secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var("JWT_SECRET") {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var("JWT_SECRET") };
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    if secret.len() < MIN_JWT_SECRET_LENGTH {
        error!(
            "JWT secret is shorter than {} characters. Use a longer secret",
            MIN_JWT_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Parse and validate an origin URL given on the command line.
/// Returns None and logs an error if validation fails.
pub fn validate_origin(name: &str, origin: &str) -> Option<Url> {
    match Url::parse(origin) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Some(url),
        Ok(_) => {
            error!(origin = %origin, "{} must be an http or https URL", name);
            None
        }
        Err(e) => {
            error!(origin = %origin, error = %e, "Invalid {} URL", name);
            None
        }
    }
}

/// Build the token lifetimes from arguments.
/// Returns None and logs an error if any lifetime is zero.
pub fn lifetimes_from_args(args: &Args) -> Option<TokenLifetimes> {
    if args.access_token_secs == 0 || args.refresh_token_secs == 0 || args.remember_me_secs == 0 {
        error!("Token lifetimes must be greater than zero");
        return None;
    }
    if args.remember_me_secs < args.refresh_token_secs {
        warn!("--remember-me-secs is shorter than --refresh-token-secs");
    }
    Some(TokenLifetimes {
        access: args.access_token_secs,
        refresh: args.refresh_token_secs,
        extended_refresh: args.remember_me_secs,
    })
}

/// Build the OAuth configuration. A provider is enabled when both its client
/// ID and secret are set.
pub fn oauth_from_args(args: &Args, server_url: &Url) -> OAuthConfig {
    let base = server_url.as_str().trim_end_matches('/');

    let google = match (&args.google_client_id, &args.google_client_secret) {
        (Some(id), Some(secret)) => Some(ProviderConfig::google(
            id.clone(),
            secret.clone(),
            format!("{}/auth/google/callback", base),
        )),
        _ => None,
    };
    let github = match (&args.github_client_id, &args.github_client_secret) {
        (Some(id), Some(secret)) => Some(ProviderConfig::github(
            id.clone(),
            secret.clone(),
            format!("{}/auth/github/callback", base),
        )),
        _ => None,
    };

    info!(
        google = google.is_some(),
        github = github.is_some(),
        "OAuth providers"
    );

    OAuthConfig { google, github }
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    args: &Args,
    db: Database,
    jwt_secret: String,
    client_url: Url,
    lifetimes: TokenLifetimes,
    oauth: OAuthConfig,
) -> ServerConfig {
    ServerConfig {
        db,
        jwt_secret: jwt_secret.into_bytes(),
        lifetimes,
        client_url: client_url.as_str().trim_end_matches('/').to_string(),
        oauth,
        trust_forwarded_for: args.trust_forwarded_for,
        auth_rate_limit: NonZeroU32::new(args.auth_rate_limit),
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
