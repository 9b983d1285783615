//! Tests for the account and session endpoints.
//!
//! Tests cover:
//! - Registration, login, and the response envelopes
//! - Refresh token rotation and reuse detection
//! - Logout, logout-all, and session listing
//! - Password change, reset, and email verification
//! - Validation, duplicate, and rate limit errors

mod common;

use axum::http::{Method, StatusCode};
use common::*;
use serde_json::json;
use tokengate::jwt::unix_now;

#[tokio::test]
async fn test_register_login_refresh_flow() {
    let (app, _db) = create_test_app().await;

    let (status, body) = post(
        &app,
        "/auth/register",
        None,
        json!({ "email": "alice@example.com", "password": TEST_PASSWORD }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["user"]["email"], "alice@example.com");
    assert_eq!(body["data"]["user"]["role"], "USER");
    assert_eq!(body["data"]["user"]["isEmailVerified"], false);
    assert!(body["data"]["user"].get("passwordHash").is_none());
    let first_refresh = body["data"]["refreshToken"].as_str().unwrap().to_string();

    // Wrong password
    let (status, body) = post(
        &app,
        "/auth/login",
        None,
        json!({ "email": "alice@example.com", "password": "wrong-password" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Invalid email or password");
    assert_eq!(body["error"]["code"], "AUTHENTICATION_ERROR");

    // Refresh rotates
    let (status, body) = refresh(&app, &first_refresh).await;
    assert_eq!(status, StatusCode::OK);
    let access = body["data"]["accessToken"].as_str().unwrap().to_string();
    let second_refresh = body["data"]["refreshToken"].as_str().unwrap().to_string();
    assert_ne!(second_refresh, first_refresh);

    // The original refresh token is spent
    let (status, body) = refresh(&app, &first_refresh).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid refresh token");

    // The new one works once
    let (status, _) = refresh(&app, &second_refresh).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(&app, "/auth/me", Some(&access)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["email"], "alice@example.com");
}

#[tokio::test]
async fn test_login_unknown_email_matches_wrong_password() {
    let (app, _db) = create_test_app().await;
    register(&app, "alice@example.com").await;

    let (status, unknown) = post(
        &app,
        "/auth/login",
        None,
        json!({ "email": "nobody@example.com", "password": TEST_PASSWORD }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, wrong) = post(
        &app,
        "/auth/login",
        None,
        json!({ "email": "alice@example.com", "password": "Wrong-pass1" }),
    )
    .await;
    assert_eq!(unknown, wrong);
}

#[tokio::test]
async fn test_login_normalizes_email_and_sets_last_login() {
    let (app, db) = create_test_app().await;
    register(&app, "alice@example.com").await;

    let (status, body) = post(
        &app,
        "/auth/login",
        None,
        json!({ "email": "  Alice@Example.COM ", "password": TEST_PASSWORD }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Login successful");

    let user = user_by_email(&db, "alice@example.com").await;
    assert!(user.last_login_at.is_some());
}

#[tokio::test]
async fn test_remember_me_extends_refresh_session() {
    let (app, _db) = create_test_app().await;
    register(&app, "alice@example.com").await;

    let short = login(&app, "alice@example.com", false).await;
    let long = login(&app, "alice@example.com", true).await;

    let (status, body) = get(&app, "/auth/sessions", Some(&long.access_token)).await;
    assert_eq!(status, StatusCode::OK);
    let sessions = body["data"]["sessions"].as_array().unwrap();
    // register + two logins
    assert_eq!(sessions.len(), 3);
    assert_eq!(
        sessions.iter().filter(|s| s["rememberMe"] == true).count(),
        1
    );
    assert!(sessions.iter().all(|s| s.get("token").is_none()));

    // Rotation keeps the flag
    let (status, _) = refresh(&app, &long.refresh_token).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = get(&app, "/auth/sessions", Some(&short.access_token)).await;
    let sessions = body["data"]["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 3);
    assert_eq!(
        sessions.iter().filter(|s| s["rememberMe"] == true).count(),
        1
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_refresh_has_single_winner() {
    let (app, _db) = create_test_app().await;
    let session = register(&app, "alice@example.com").await;

    let (a, b) = tokio::join!(
        refresh(&app, &session.refresh_token),
        refresh(&app, &session.refresh_token)
    );

    let mut statuses = [a.0, b.0];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::UNAUTHORIZED]);
}

#[tokio::test]
async fn test_refresh_requires_token() {
    let (app, _db) = create_test_app().await;

    let (status, body) = post(&app, "/auth/refresh", None, json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Refresh token required");

    let (status, body) = send(&app, Method::POST, "/auth/refresh", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Refresh token required");

    let (status, body) = refresh(&app, "not-a-real-token").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid refresh token");
}

#[tokio::test]
async fn test_refresh_fails_after_user_deleted() {
    let (app, db) = create_test_app().await;
    let session = register(&app, "alice@example.com").await;
    let user = user_by_email(&db, "alice@example.com").await;

    db.users().delete(user.id).await.unwrap();

    let (status, _) = refresh(&app, &session.refresh_token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // The access token names a user that no longer exists
    let (status, _) = get(&app, "/auth/me", Some(&session.access_token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_revokes_refresh_token() {
    let (app, _db) = create_test_app().await;
    let session = register(&app, "alice@example.com").await;

    let (status, body) = post(
        &app,
        "/auth/logout",
        Some(&session.access_token),
        json!({ "refreshToken": session.refresh_token }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Logout successful");

    let (status, _) = refresh(&app, &session.refresh_token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_ignores_other_users_token() {
    let (app, _db) = create_test_app().await;
    let alice = register(&app, "alice@example.com").await;
    let bob = register(&app, "bob@example.com").await;

    let (status, _) = post(
        &app,
        "/auth/logout",
        Some(&bob.access_token),
        json!({ "refreshToken": alice.refresh_token }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = refresh(&app, &alice.refresh_token).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_logout_without_body() {
    let (app, _db) = create_test_app().await;
    let session = register(&app, "alice@example.com").await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/auth/logout",
        Some(&session.access_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Logout successful");

    // Nothing named, nothing revoked
    let (status, _) = refresh(&app, &session.refresh_token).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_logout_requires_access_token() {
    let (app, _db) = create_test_app().await;
    let session = register(&app, "alice@example.com").await;

    let (status, body) = post(
        &app,
        "/auth/logout",
        None,
        json!({ "refreshToken": session.refresh_token }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "AUTHENTICATION_ERROR");
}

#[tokio::test]
async fn test_logout_all_revokes_every_session() {
    let (app, _db) = create_test_app().await;
    let first = register(&app, "alice@example.com").await;
    let second = login(&app, "alice@example.com", true).await;

    let (status, body) = post(&app, "/auth/logout-all", Some(&second.access_token), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["revoked"], 2);

    assert_eq!(refresh(&app, &first.refresh_token).await.0, StatusCode::UNAUTHORIZED);
    assert_eq!(refresh(&app, &second.refresh_token).await.0, StatusCode::UNAUTHORIZED);

    let (_, body) = get(&app, "/auth/sessions", Some(&second.access_token)).await;
    assert_eq!(body["data"]["sessions"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_me_rejects_bad_tokens() {
    let (app, _db) = create_test_app().await;

    let (status, _) = get(&app, "/auth/me", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = get(&app, "/auth/me", Some("garbage")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    // A refresh token is not an access token
    let session = register(&app, "alice@example.com").await;
    let (status, _) = get(&app, "/auth/me", Some(&session.refresh_token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_status_never_fails() {
    let (app, _db) = create_test_app().await;

    let (status, body) = get(&app, "/auth/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["authenticated"], false);
    assert!(body["data"].get("user").is_none());

    let (status, body) = get(&app, "/auth/status", Some("garbage")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["authenticated"], false);

    let session = register(&app, "alice@example.com").await;
    let (_, body) = get(&app, "/auth/status", Some(&session.access_token)).await;
    assert_eq!(body["data"]["authenticated"], true);
    assert_eq!(body["data"]["user"]["email"], "alice@example.com");
}

#[tokio::test]
async fn test_register_validation_errors() {
    let (app, _db) = create_test_app().await;

    let (status, body) = post(
        &app,
        "/auth/register",
        None,
        json!({ "email": "not-an-email", "password": "short" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let details = body["error"]["details"].as_array().unwrap();
    let fields: Vec<&str> = details
        .iter()
        .map(|d| d["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"email"));
    assert!(fields.contains(&"password"));
}

#[tokio::test]
async fn test_malformed_body_is_validation_error() {
    let (app, _db) = create_test_app().await;

    let (status, body) = post(&app, "/auth/login", None, json!({ "email": 42 })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["details"][0]["field"], "body");
}

#[tokio::test]
async fn test_register_duplicate_email() {
    let (app, _db) = create_test_app().await;
    register(&app, "alice@example.com").await;

    let (status, body) = post(
        &app,
        "/auth/register",
        None,
        json!({ "email": "ALICE@example.com", "password": TEST_PASSWORD }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "DUPLICATE_ERROR");
}

#[tokio::test]
async fn test_change_password_revokes_sessions() {
    let (app, _db) = create_test_app().await;
    let session = register(&app, "alice@example.com").await;

    // Wrong current password is a field error, not an auth failure
    let (status, body) = post(
        &app,
        "/auth/change-password",
        Some(&session.access_token),
        json!({ "currentPassword": "Wrong-pass1", "newPassword": "N3w-password" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["details"][0]["field"], "currentPassword");

    let (status, body) = post(
        &app,
        "/auth/change-password",
        Some(&session.access_token),
        json!({ "currentPassword": TEST_PASSWORD, "newPassword": "N3w-password" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    assert_eq!(refresh(&app, &session.refresh_token).await.0, StatusCode::UNAUTHORIZED);

    let (status, _) = post(
        &app,
        "/auth/login",
        None,
        json!({ "email": "alice@example.com", "password": "N3w-password" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_forgot_password_does_not_reveal_accounts() {
    let (app, _db) = create_test_app().await;
    register(&app, "alice@example.com").await;

    let (status, known) = post(
        &app,
        "/auth/forgot-password",
        None,
        json!({ "email": "alice@example.com" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(known["success"], true);

    let (status, unknown) = post(
        &app,
        "/auth/forgot-password",
        None,
        json!({ "email": "nobody@example.com" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(known, unknown);
}

#[tokio::test]
async fn test_reset_password_with_token() {
    let (app, db) = create_test_app().await;
    let session = register(&app, "alice@example.com").await;
    let user = user_by_email(&db, "alice@example.com").await;

    let now = unix_now().unwrap();
    db.users()
        .set_reset_token(user.id, "known-reset-token", now + 3600)
        .await
        .unwrap();

    let (status, body) = post(
        &app,
        "/auth/reset-password",
        None,
        json!({ "token": "wrong-token", "password": "N3w-password" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["details"][0]["field"], "token");

    let (status, _) = post(
        &app,
        "/auth/reset-password",
        None,
        json!({ "token": "known-reset-token", "password": "N3w-password" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Sessions are gone and the token is single use
    assert_eq!(refresh(&app, &session.refresh_token).await.0, StatusCode::UNAUTHORIZED);
    let (status, _) = post(
        &app,
        "/auth/reset-password",
        None,
        json!({ "token": "known-reset-token", "password": "An0ther-password" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = post(
        &app,
        "/auth/login",
        None,
        json!({ "email": "alice@example.com", "password": "N3w-password" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_expired_reset_token_rejected() {
    let (app, db) = create_test_app().await;
    register(&app, "alice@example.com").await;
    let user = user_by_email(&db, "alice@example.com").await;

    let now = unix_now().unwrap();
    db.users()
        .set_reset_token(user.id, "stale-token", now - 1)
        .await
        .unwrap();

    let (status, _) = post(
        &app,
        "/auth/reset-password",
        None,
        json!({ "token": "stale-token", "password": "N3w-password" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_verify_email() {
    let (app, db) = create_test_app().await;
    register(&app, "alice@example.com").await;
    let user = user_by_email(&db, "alice@example.com").await;
    db.users()
        .set_verify_token(user.id, "known-verify-token")
        .await
        .unwrap();

    let (status, _) = post(
        &app,
        "/auth/verify-email",
        None,
        json!({ "token": "known-verify-token" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(user_by_email(&db, "alice@example.com").await.email_verified);

    let (status, body) = post(
        &app,
        "/auth/verify-email",
        None,
        json!({ "token": "known-verify-token" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["details"][0]["field"], "token");

    // Already verified: same answer as unknown addresses
    let (status, body) = post(
        &app,
        "/auth/resend-verification",
        None,
        json!({ "email": "alice@example.com" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn test_rate_limit_on_credential_endpoints() {
    let (app, _db) = create_rate_limited_app(3).await;

    for _ in 0..3 {
        let (status, _) = post(
            &app,
            "/auth/login",
            None,
            json!({ "email": "nobody@example.com", "password": TEST_PASSWORD }),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, body) = post(
        &app,
        "/auth/login",
        None,
        json!({ "email": "nobody@example.com", "password": TEST_PASSWORD }),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "RATE_LIMIT_ERROR");

    // Refresh shares the bucket
    let (status, _) = refresh(&app, "anything").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // Session endpoints are not limited
    let (status, _) = get(&app, "/auth/status", None).await;
    assert_eq!(status, StatusCode::OK);
}
