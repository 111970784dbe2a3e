use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common::types::MessageResponse;
use configs::ConfigError;
use service::errors::{BootstrapError, StorageError, TokenError};
use thiserror::Error;

pub const INVALID_API_KEY_MESSAGE: &str = "Invalid or missing API key";

/// Per-request failure rendered as the `{message, status}` envelope.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, INVALID_API_KEY_MESSAGE)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = MessageResponse::new(self.message, self.status.as_u16());
        (self.status, Json(body)).into_response()
    }
}

// Any failed read is reported as not found, with the storage error as context.
impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("failed to read file: {e}"))
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),
    #[error("cannot obtain secret manager credentials: {0}")]
    Credentials(#[from] TokenError),
    #[error("listener error: {0}")]
    Listener(#[source] std::io::Error),
}
