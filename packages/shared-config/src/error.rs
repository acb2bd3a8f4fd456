//! Configuration error types

use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid value for environment variable
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    /// Bind address that is neither an IP nor a host name
    #[error("invalid bind address: {0:?}")]
    InvalidAddress(String),

    /// Control URL the CLI cannot use
    #[error("invalid URL for {0}: {1} (expected http:// or https://)")]
    InvalidUrl(String, String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
