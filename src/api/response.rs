//! Success envelope: `{"success": true, "message": .., "data": ..}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// A successful API response. `data` is omitted when there is nothing to return.
pub struct ApiResponse<T> {
    status: StatusCode,
    message: &'static str,
    data: Option<T>,
}

#[derive(Serialize)]
struct Envelope<T> {
    success: bool,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: &'static str, data: T) -> Self {
        Self {
            status: StatusCode::OK,
            message,
            data: Some(data),
        }
    }

    pub fn created(message: &'static str, data: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            message,
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    /// A success response with a message only.
    pub fn message(message: &'static str) -> Self {
        Self {
            status: StatusCode::OK,
            message,
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let body = Envelope {
            success: true,
            message: self.message,
            data: self.data,
        };
        (self.status, Json(body)).into_response()
    }
}
