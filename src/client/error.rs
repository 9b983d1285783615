//! Client error types.

use thiserror::Error;

/// Errors returned by [`AuthClient`](super::AuthClient).
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure (connection refused, timeout, bad response body)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with an error envelope
    #[error("{code} ({status}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// The refresh token was rejected or the refresh did not finish in time.
    /// Local session state has been cleared.
    #[error("Session expired, please sign in again")]
    SessionExpired,

    /// The server accepted the request but sent no `data`
    #[error("Response carried no data")]
    MissingData,

    #[error("Session storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// HTTP status of an API error, if this is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Error code of an API error, if this is one.
    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Api { code, .. } => Some(code),
            _ => None,
        }
    }
}
