//! Error types for the MLServe server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mlserve_core::BatchError;
use serde_json::json;

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Request body failed validation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The batch queue refused or failed the request
    #[error(transparent)]
    Batch(#[from] BatchError),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Batch(err) => match err {
                BatchError::QueueFull { .. } => StatusCode::TOO_MANY_REQUESTS,
                BatchError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                BatchError::NotStarted | BatchError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
                BatchError::Handler(_)
                | BatchError::ShapeMismatch { .. }
                | BatchError::AlreadyStarted => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Short machine-readable name, also used as the metrics status label
    pub fn kind(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) => "invalid_request",
            ServerError::Batch(err) => match err {
                BatchError::Handler(_) => "handler_error",
                BatchError::ShapeMismatch { .. } => "shape_mismatch",
                BatchError::QueueFull { .. } => "queue_full",
                BatchError::Timeout { .. } => "timeout",
                BatchError::NotStarted | BatchError::AlreadyStarted => "not_ready",
                BatchError::Shutdown => "shutdown",
            },
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": self.kind(),
            }
        }));

        (status, body).into_response()
    }
}
