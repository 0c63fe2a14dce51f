//! REST error responses
//!
//! Handlers return `ApiError`, which maps domain errors onto HTTP status
//! codes and a `{error, details}` JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use binsight_common::Error;
use serde_json::json;
use tracing::error;

/// Error type for REST handlers
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: format!("Not found: {}", what.into()),
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            details: None,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation { field, message } => Self {
                status: StatusCode::BAD_REQUEST,
                message: "Validation failed".to_string(),
                details: Some(json!({ "field": field, "message": message })),
            },
            Error::NotFound(what) => Self {
                status: StatusCode::NOT_FOUND,
                message: format!("Not found: {what}"),
                details: None,
            },
            other => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "Internal server error".to_string(),
                details: Some(json!(other.to_string())),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {} {:?}", self.message, self.details);
        }
        let body = json!({
            "error": self.message,
            "details": self.details,
        });
        (self.status, Json(body)).into_response()
    }
}
