//! Error types for trickle.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::relay::types::OpenAiError;

/// Main error type for trickle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
        };

        let body = serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": ERROR_TYPE,
                "code": status.as_u16()
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

/// `type` field stamped on errors raised by the relay itself.
pub const ERROR_TYPE: &str = "trickle_error";

/// Structured failure of a relay call.
///
/// Carries an OpenAI-compatible error envelope and the HTTP status the caller
/// should answer with. The relay never writes this to the client; the caller
/// decides.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{} ({}): {}", error.code_str(), status_code, error.message)]
pub struct RelayError {
    pub error: OpenAiError,
    pub status_code: StatusCode,
}

impl RelayError {
    /// The envelope's `code`, when it is a string.
    pub fn code(&self) -> Option<&str> {
        self.error.code.as_str()
    }
}

/// Build a [`RelayError`] from an underlying failure, a machine-readable code
/// and the status to answer with.
pub fn error_wrapper(
    err: impl std::fmt::Display,
    code: &str,
    status_code: StatusCode,
) -> RelayError {
    RelayError {
        error: OpenAiError {
            message: err.to_string(),
            error_type: ERROR_TYPE.to_string(),
            param: String::new(),
            code: serde_json::Value::String(code.to_string()),
        },
        status_code,
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.error });
        (self.status_code, axum::Json(body)).into_response()
    }
}
