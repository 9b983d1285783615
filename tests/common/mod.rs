#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use serde_json::Value;
use std::num::NonZeroU32;
use tokengate::{
    ServerConfig,
    auth::TokenLifetimes,
    create_app,
    db::{Database, User, UserRole},
    oauth::OAuthConfig,
};
use tower::ServiceExt;

pub const TEST_JWT_SECRET: &[u8] = b"test-jwt-secret-at-least-32-bytes-long";
pub const TEST_PASSWORD: &str = "Passw0rd!";

/// Server configuration backed by a fresh in-memory database, without rate limits.
pub async fn test_config() -> ServerConfig {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    ServerConfig {
        db,
        jwt_secret: TEST_JWT_SECRET.to_vec(),
        lifetimes: TokenLifetimes::default(),
        client_url: "http://localhost:3000".to_string(),
        oauth: OAuthConfig::default(),
        trust_forwarded_for: false,
        auth_rate_limit: None,
    }
}

/// Create a test app and return (app, db).
pub async fn create_test_app() -> (Router, Database) {
    let config = test_config().await;
    (create_app(&config), config.db.clone())
}

/// Create a test app allowing `per_minute` requests to rate-limited endpoints.
pub async fn create_rate_limited_app(per_minute: u32) -> (Router, Database) {
    let mut config = test_config().await;
    config.auth_rate_limit = NonZeroU32::new(per_minute);
    (create_app(&config), config.db.clone())
}

/// Send a request and return the raw response.
pub async fn send_raw(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    app.clone().oneshot(request).await.unwrap()
}

/// Send a request and return the status and JSON body (Null when empty).
pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let response = send_raw(app, method, uri, token, body).await;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

pub async fn post(app: &Router, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
    send(app, Method::POST, uri, token, Some(body)).await
}

pub async fn get(app: &Router, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
    send(app, Method::GET, uri, token, None).await
}

/// Tokens and user returned by register or login.
pub struct TestSession {
    pub access_token: String,
    pub refresh_token: String,
    pub user: Value,
}

impl TestSession {
    fn from_data(data: &Value) -> Self {
        Self {
            access_token: data["accessToken"].as_str().unwrap().to_string(),
            refresh_token: data["refreshToken"].as_str().unwrap().to_string(),
            user: data["user"].clone(),
        }
    }
}

/// Register a user with [`TEST_PASSWORD`] and return the session.
pub async fn register(app: &Router, email: &str) -> TestSession {
    let (status, body) = post(
        app,
        "/auth/register",
        None,
        serde_json::json!({ "email": email, "password": TEST_PASSWORD }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
    TestSession::from_data(&body["data"])
}

pub async fn login(app: &Router, email: &str, remember_me: bool) -> TestSession {
    let (status, body) = post(
        app,
        "/auth/login",
        None,
        serde_json::json!({ "email": email, "password": TEST_PASSWORD, "rememberMe": remember_me }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {}", body);
    TestSession::from_data(&body["data"])
}

/// Register a user and give them `role`. Roles are read from the database on
/// every request, so the returned access token carries the new role.
pub async fn register_with_role(
    app: &Router,
    db: &Database,
    email: &str,
    role: UserRole,
) -> TestSession {
    let session = register(app, email).await;
    let user = user_by_email(db, email).await;
    db.users().set_role(user.id, role).await.unwrap();
    session
}

pub async fn user_by_email(db: &Database, email: &str) -> User {
    db.users().get_by_email(email).await.unwrap().unwrap()
}

pub async fn refresh(app: &Router, refresh_token: &str) -> (StatusCode, Value) {
    post(
        app,
        "/auth/refresh",
        None,
        serde_json::json!({ "refreshToken": refresh_token }),
    )
    .await
}
