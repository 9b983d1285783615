//! Rate limiting for authentication endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down credential
//! stuffing and token guessing.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};
use tracing::warn;

use crate::api::ApiError;
use crate::auth::extract_client_ip;

/// Default number of requests per minute per IP on rate-limited auth endpoints.
pub const DEFAULT_AUTH_REQUESTS_PER_MINUTE: u32 = 20;

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Rate limiting configuration for authentication endpoints.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Limiter shared by register, login, refresh, and the email-token endpoints.
    /// None disables rate limiting.
    pub auth: Option<Arc<IpLimiter>>,
    /// Key on `X-Forwarded-For` instead of the peer address
    pub trust_forwarded_for: bool,
}

impl RateLimitConfig {
    /// Allow `per_minute` requests per minute per IP, with the same burst.
    pub fn new(per_minute: Option<NonZeroU32>, trust_forwarded_for: bool) -> Self {
        Self {
            auth: per_minute.map(|n| Arc::new(RateLimiter::keyed(Quota::per_minute(n)))),
            trust_forwarded_for,
        }
    }

    /// No limits at all.
    pub fn disabled() -> Self {
        Self {
            auth: None,
            trust_forwarded_for: false,
        }
    }
}

/// Middleware for rate limiting authentication endpoints.
///
/// Requests without a resolvable client address share the "unknown" bucket.
pub async fn rate_limit_auth(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(limiter) = config.auth.as_ref() else {
        return next.run(request).await;
    };

    let ip = extract_client_ip(&request, config.trust_forwarded_for)
        .unwrap_or_else(|| "unknown".to_string());

    match limiter.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            warn!(ip = %ip, path = %request.uri().path(), "Rate limit exceeded");
            ApiError::too_many_requests("Too many requests. Please try again later.")
                .into_response()
        }
    }
}
