//! Error handling for the control server
//!
//! This module provides the control server's error type using thiserror,
//! with HTTP status code mapping via Axum's IntoResponse trait.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use librarian_worker::WorkerError;
use serde::Serialize;
use thiserror::Error;

/// Error code the CLI and scripts match on when the server has no tokens
pub const AUTH_NOT_CONFIGURED: &str = "auth_not_configured";

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for client-side handling
    pub code: &'static str,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Main API error type
#[derive(Error, Debug)]
pub enum ApiError {
    // ========== Authentication ==========
    /// The server itself has no usable tokens
    #[error("Authentication required: {0}")]
    AuthNotConfigured(String),

    /// Request carried no token
    #[error("authentication required")]
    Unauthorized,

    /// Request carried a token that does not match
    #[error("invalid control token")]
    Forbidden,

    // ========== Resource Errors ==========
    /// Requested resource not found
    #[error("{resource_type} not found: {id}")]
    NotFound {
        resource_type: &'static str,
        id: String,
    },

    // ========== Validation Errors ==========
    /// Request validation failed
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Invalid request body format
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    // ========== Daemon Errors ==========
    /// Daemon is stopping and takes no new work
    #[error("daemon is shutting down")]
    ShuttingDown,

    /// Job engine error
    #[error(transparent)]
    Worker(WorkerError),

    // ========== Internal Errors ==========
    /// Internal server error (catch-all for unexpected errors)
    #[error("internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthNotConfigured(_) | Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::Worker(err) => match err {
                WorkerError::UnknownCommand(_) | WorkerError::InvalidArgs(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                WorkerError::JobNotFound(_) | WorkerError::TemplateNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code string for client-side handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AuthNotConfigured(_) => AUTH_NOT_CONFIGURED,
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::InvalidBody(_) => "INVALID_BODY",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Worker(err) => match err {
                WorkerError::UnknownCommand(_) => "UNKNOWN_COMMAND",
                WorkerError::InvalidArgs(_) => "INVALID_ARGS",
                WorkerError::JobNotFound(_) => "JOB_NOT_FOUND",
                WorkerError::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
                WorkerError::TemplateCycle(_) | WorkerError::TemplateParse { .. } => {
                    "TEMPLATE_ERROR"
                }
                _ => "WORKER_ERROR",
            },
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Create a not found error for a specific resource
    pub fn not_found(resource_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type,
            id: id.into(),
        }
    }

    /// Log the error with appropriate severity based on status code
    pub fn log(&self) {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(
                error = %self,
                code = self.error_code(),
                status = status.as_u16(),
                "Server error occurred"
            );
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::warn!(
                error = %self,
                code = self.error_code(),
                status = status.as_u16(),
                "Authorization error"
            );
        } else {
            tracing::debug!(
                error = %self,
                code = self.error_code(),
                status = status.as_u16(),
                "Client error"
            );
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.status_code();

        // Scripts check this body shape without parsing the usual envelope
        if let Self::AuthNotConfigured(reason) = &self {
            return (
                status,
                Json(serde_json::json!({
                    "error": AUTH_NOT_CONFIGURED,
                    "message": reason,
                })),
            )
                .into_response();
        }

        let error_response = ErrorResponse {
            code: self.error_code(),
            message: self.to_string(),
            details: None,
        };
        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

// ========== Conversion Implementations ==========

impl From<WorkerError> for ApiError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::JobNotFound(id) => Self::not_found("job", id),
            other => Self::Worker(other),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ApiError>() {
            Ok(api_err) => api_err,
            Err(err) => Self::Internal(err.to_string()),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
