//! Scheduled cleanup tasks for expired data.

use crate::auth::TokenLifetimes;
use crate::db::Database;
use crate::jwt::unix_now;
use std::time::Duration;
use tracing::{error, info};

/// Interval between cleanup runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60); // 1 hour

/// Run all cleanup tasks once.
///
/// Revoked refresh tokens are kept for the longest session lifetime so the
/// sessions they belonged to can still be inspected.
pub async fn run_cleanup(db: &Database, lifetimes: &TokenLifetimes) {
    let now = match unix_now() {
        Ok(now) => now,
        Err(e) => {
            error!("Skipping cleanup: {}", e);
            return;
        }
    };
    let retention = lifetimes.refresh.max(lifetimes.extended_refresh);

    // Clean up expired and long-revoked refresh tokens
    match db
        .refresh_tokens()
        .delete_stale(now, now.saturating_sub(retention))
        .await
    {
        Ok(count) if count > 0 => info!("Cleaned up {} stale refresh tokens", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up refresh tokens: {}", e),
    }

    // Clean up abandoned OAuth sign-ins
    match db.oauth_states().cleanup_expired().await {
        Ok(count) if count > 0 => info!("Cleaned up {} expired OAuth states", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up OAuth states: {}", e),
    }

    // Clean up expired password reset tokens
    match db.users().cleanup_reset_tokens(now).await {
        Ok(count) if count > 0 => info!("Cleaned up {} expired password reset tokens", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up password reset tokens: {}", e),
    }
}

/// Spawn a background task that runs cleanup periodically.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(
    db: Database,
    lifetimes: TokenLifetimes,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            interval.tick().await;
            run_cleanup(&db, &lifetimes).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{AuthProvider, NewRefreshToken, NewUser};

    #[tokio::test]
    async fn test_cleanup_removes_expired_tokens() {
        let db = Database::open(":memory:").await.unwrap();
        let user_id = db
            .users()
            .create(&NewUser {
                uuid: "uuid-1",
                email: "alice@example.com",
                password_hash: None,
                first_name: None,
                last_name: None,
                provider: AuthProvider::Email,
                provider_id: None,
                email_verified: false,
            })
            .await
            .unwrap();

        let now = unix_now().unwrap();
        for (token, expires_at) in [("expired", now - 10), ("live", now + 3600)] {
            db.refresh_tokens()
                .create(&NewRefreshToken {
                    token: token.to_string(),
                    user_id,
                    extended: false,
                    issued_at: now - 100,
                    expires_at,
                })
                .await
                .unwrap();
        }
        db.users().set_reset_token(user_id, "reset", now - 1).await.unwrap();

        run_cleanup(&db, &TokenLifetimes::default()).await;

        assert!(db.refresh_tokens().get_by_token("expired").await.unwrap().is_none());
        assert!(db.refresh_tokens().get_by_token("live").await.unwrap().is_some());
        assert!(
            db.users()
                .get_by_reset_token("reset", now - 10)
                .await
                .unwrap()
                .is_none()
        );
    }
}
