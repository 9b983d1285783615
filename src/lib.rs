pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod client;
pub mod db;
pub mod jwt;
pub mod oauth;
pub mod rate_limit;

use api::create_api_router;
use auth::{TokenIssuer, TokenLifetimes};
use axum::Router;
use db::Database;
use jwt::JwtConfig;
use oauth::OAuthConfig;
use rate_limit::RateLimitConfig;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// JWT secret for signing access tokens
    pub jwt_secret: Vec<u8>,
    /// Access and refresh token lifetimes
    pub lifetimes: TokenLifetimes,
    /// Frontend origin that OAuth callbacks redirect to
    pub client_url: String,
    /// Enabled OAuth providers
    pub oauth: OAuthConfig,
    /// Trust `X-Forwarded-For` for the client IP (requires running behind a proxy)
    pub trust_forwarded_for: bool,
    /// Requests per minute per IP on credential endpoints. None disables limiting.
    pub auth_rate_limit: Option<NonZeroU32>,
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    let jwt = Arc::new(JwtConfig::new(&config.jwt_secret, config.lifetimes.access));
    let issuer = Arc::new(TokenIssuer::new(
        jwt.clone(),
        config.db.clone(),
        config.lifetimes,
    ));
    let rate_limit = Arc::new(RateLimitConfig::new(
        config.auth_rate_limit,
        config.trust_forwarded_for,
    ));

    create_api_router(
        config.db.clone(),
        jwt,
        issuer,
        config.oauth.clone(),
        config.client_url.clone(),
        rate_limit,
    )
    .layer(TraceLayer::new_for_http())
}

/// Run cleanup tasks and spawn background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(db: &Database, lifetimes: &TokenLifetimes) {
    cleanup::run_cleanup(db, lifetimes).await;
    cleanup::spawn_cleanup_scheduler(db.clone(), *lifetimes);
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
/// Note: For production use, prefer `run_server` directly in main.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> (tokio::task::JoinHandle<()>, SocketAddr) {
    // Run cleanup tasks on startup
    init_cleanup(&config.db, &config.lifetimes).await;

    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await.expect("Failed to bind");
    let local_addr = listener.local_addr().expect("Failed to get local address");

    let handle = tokio::spawn(async move {
        run_server(config, listener).await.ok();
    });

    (handle, local_addr)
}
