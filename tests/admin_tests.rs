//! Tests for role-gated admin endpoints.

mod common;

use axum::http::StatusCode;
use common::*;
use serde_json::json;
use tokengate::db::UserRole;

#[tokio::test]
async fn test_user_cannot_list_sessions() {
    let (app, db) = create_test_app().await;
    let user = register(&app, "user@example.com").await;
    let target = user_by_email(&db, "user@example.com").await;

    let (status, body) = get(
        &app,
        &format!("/admin/users/{}/sessions", target.uuid),
        Some(&user.access_token),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "AUTHORIZATION_ERROR");
}

#[tokio::test]
async fn test_moderator_can_list_but_not_revoke() {
    let (app, db) = create_test_app().await;
    let moderator =
        register_with_role(&app, &db, "mod@example.com", UserRole::Moderator).await;
    let target_session = register(&app, "target@example.com").await;
    let target = user_by_email(&db, "target@example.com").await;

    let (status, body) = get(
        &app,
        &format!("/admin/users/{}/sessions", target.uuid),
        Some(&moderator.access_token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["sessions"].as_array().unwrap().len(), 1);

    let (status, _) = post(
        &app,
        &format!("/admin/users/{}/revoke-sessions", target.uuid),
        Some(&moderator.access_token),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    assert_eq!(
        refresh(&app, &target_session.refresh_token).await.0,
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_admin_revokes_user_sessions() {
    let (app, db) = create_test_app().await;
    let admin = register_with_role(&app, &db, "admin@example.com", UserRole::Admin).await;
    let target_session = register(&app, "target@example.com").await;
    let target = user_by_email(&db, "target@example.com").await;

    let (status, body) = post(
        &app,
        &format!("/admin/users/{}/revoke-sessions", target.uuid),
        Some(&admin.access_token),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["revoked"], 1);

    assert_eq!(
        refresh(&app, &target_session.refresh_token).await.0,
        StatusCode::UNAUTHORIZED
    );

    // The admin's own session is untouched
    assert_eq!(refresh(&app, &admin.refresh_token).await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_role_change_applies_to_existing_tokens() {
    let (app, db) = create_test_app().await;
    let admin = register_with_role(&app, &db, "admin@example.com", UserRole::Admin).await;
    let account = user_by_email(&db, "admin@example.com").await;

    let path = format!("/admin/users/{}/sessions", account.uuid);
    assert_eq!(get(&app, &path, Some(&admin.access_token)).await.0, StatusCode::OK);

    db.users().set_role(account.id, UserRole::User).await.unwrap();
    assert_eq!(
        get(&app, &path, Some(&admin.access_token)).await.0,
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn test_admin_invalid_and_unknown_ids() {
    let (app, db) = create_test_app().await;
    let admin = register_with_role(&app, &db, "admin@example.com", UserRole::Admin).await;

    let (status, body) = get(
        &app,
        "/admin/users/not-a-uuid/sessions",
        Some(&admin.access_token),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["details"][0]["field"], "id");

    let (status, body) = get(
        &app,
        &format!("/admin/users/{}/sessions", uuid::Uuid::new_v4()),
        Some(&admin.access_token),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND_ERROR");
}

#[tokio::test]
async fn test_admin_requires_authentication() {
    let (app, _db) = create_test_app().await;

    let (status, _) = get(
        &app,
        &format!("/admin/users/{}/sessions", uuid::Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
