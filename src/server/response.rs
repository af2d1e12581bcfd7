//! JSON envelope returned by `/run-script`
//!
//! ```json
//! { "status": "success", "message": "...", "success": true,
//!   "duration": "1.234s", "output": "...", "error": "..." }
//! ```
//!
//! Error responses carry only `status` and `message`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::scripts::ExecutionResult;

pub const MSG_SUCCESS: &str = "Script executed successfully";
pub const MSG_FAILURE: &str = "Script execution failed";
pub const MSG_INVALID_USER_ID: &str = "Invalid user ID format";
pub const MSG_SCRIPT_NOT_ALLOWED: &str = "Script not allowed";
pub const MSG_MISSING_CSRF: &str = "Missing CSRF token";
pub const MSG_EXECUTION_ERROR: &str = "Error while executing script";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    /// Envelope for a run that reached the child, successful or not
    pub fn from_result(result: &ExecutionResult) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

        if result.success {
            Self {
                status: "success".to_string(),
                message: MSG_SUCCESS.to_string(),
                success: Some(true),
                duration: Some(format!("{:?}", result.duration)),
                output: non_empty(&result.output),
                error: None,
            }
        } else {
            Self {
                status: "error".to_string(),
                message: MSG_FAILURE.to_string(),
                success: Some(false),
                duration: Some(format!("{:?}", result.duration)),
                output: non_empty(&result.output),
                error: non_empty(&result.error),
            }
        }
    }

    /// Envelope for a refused request
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            success: None,
            duration: None,
            output: None,
            error: None,
        }
    }
}

/// Reasons `/run-script` answers with something other than a result
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadForm(String),

    #[error("request body too large")]
    PayloadTooLarge,

    #[error("missing CSRF token")]
    MissingCsrf,

    #[error("invalid user id")]
    InvalidUserId,

    #[error("script not allowed")]
    ScriptNotAllowed,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("execution refused: {0}")]
    Execution(String),

    #[error("too many requests")]
    RateLimited,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadForm(_)
            | ApiError::MissingCsrf
            | ApiError::InvalidUserId
            | ApiError::ScriptNotAllowed
            | ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Execution(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Message shown to the client; never includes internal detail
    pub fn public_message(&self) -> &'static str {
        match self {
            ApiError::BadForm(_) => "Bad request",
            ApiError::PayloadTooLarge => "Request body too large",
            ApiError::MissingCsrf => MSG_MISSING_CSRF,
            ApiError::InvalidUserId => MSG_INVALID_USER_ID,
            ApiError::ScriptNotAllowed => MSG_SCRIPT_NOT_ALLOWED,
            ApiError::InvalidRequest(_) => "Invalid request",
            ApiError::Execution(_) => MSG_EXECUTION_ERROR,
            ApiError::RateLimited => "Too many requests",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Execution(detail) = &self {
            tracing::error!(error = %detail, "Script execution refused");
        }
        let body = ApiResponse::error(self.public_message());
        (self.status_code(), Json(body)).into_response()
    }
}
