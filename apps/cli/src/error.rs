//! Error types for the control client

use thiserror::Error;

/// Errors that can occur when talking to the control server
#[derive(Error, Debug)]
pub enum ClientError {
    /// The server answered with a non-2xx status; the body is kept verbatim
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Nothing is listening at the control address
    #[error("Daemon not running at {0}")]
    NotRunning(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Failed to serialize/deserialize JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    pub fn is_not_running(&self) -> bool {
        matches!(self, ClientError::NotRunning(_))
    }

    /// HTTP status, when the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for control client operations
pub type ClientResult<T> = Result<T, ClientError>;
