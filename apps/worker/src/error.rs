//! Error handling for the librarian job engine
//!
//! Every failure a command, the dispatcher, the template loader or the
//! scheduler can produce is a [`WorkerError`]. The control server maps
//! these onto HTTP status codes, so variants carry enough structure to pick
//! one without string matching.

use thiserror::Error;

/// Main worker error type
#[derive(Error, Debug)]
pub enum WorkerError {
    // ========== Dispatch Errors ==========
    /// Command namespace/method pair is not registered
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Argument vector is malformed
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// No job with this id (or mapped id) exists
    #[error("job not found: {0}")]
    JobNotFound(String),

    // ========== Execution Errors ==========
    /// Command body reported a failure
    #[error("{0}")]
    CommandFailed(String),

    /// Job execution was cancelled
    #[error("job cancelled: {0}")]
    Cancelled(String),

    // ========== Template Errors ==========
    /// No `<name>.toml` in the template directory
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// Template inheritance loops back on itself
    #[error("template cycle detected: {0}")]
    TemplateCycle(String),

    /// Template file is not valid TOML or has the wrong shape
    #[error("template '{name}' is invalid: {reason}")]
    TemplateParse { name: String, reason: String },

    /// Periodic interval could not be understood
    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    // ========== Notification Errors ==========
    /// Mail delivery failed
    #[error("mail delivery failed: {0}")]
    Mail(String),

    // ========== Configuration Errors ==========
    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// File system access error
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    // ========== Internal Errors ==========
    /// Internal worker error (catch-all for unexpected errors)
    #[error("internal worker error: {0}")]
    Internal(String),
}

impl WorkerError {
    /// Check if a failed attempt may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CommandFailed(_) | Self::Io(_) | Self::Mail(_) | Self::Internal(_)
        )
    }

    /// Get a severity level for logging
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Configuration(_) | Self::TemplateCycle(_) => ErrorSeverity::Critical,

            Self::Io(_) | Self::Mail(_) | Self::Internal(_) | Self::TemplateParse { .. } => {
                ErrorSeverity::Error
            }

            Self::CommandFailed(_) | Self::Cancelled(_) | Self::TemplateNotFound(_) => {
                ErrorSeverity::Warning
            }

            _ => ErrorSeverity::Info,
        }
    }

    /// Get the subsystem this error belongs to
    pub fn subsystem(&self) -> &'static str {
        match self {
            Self::UnknownCommand(_) | Self::InvalidArgs(_) | Self::JobNotFound(_) => "dispatch",
            Self::CommandFailed(_) | Self::Cancelled(_) => "execution",
            Self::TemplateNotFound(_)
            | Self::TemplateCycle(_)
            | Self::TemplateParse { .. }
            | Self::InvalidInterval(_) => "scheduler",
            Self::Mail(_) => "notifications",
            _ => "general",
        }
    }

    /// Log the error with appropriate severity
    pub fn log(&self) {
        let subsystem = self.subsystem();
        match self.severity() {
            ErrorSeverity::Critical => {
                tracing::error!(
                    error = %self,
                    subsystem = subsystem,
                    retryable = self.is_retryable(),
                    "Critical worker error"
                );
            }
            ErrorSeverity::Error => {
                tracing::error!(
                    error = %self,
                    subsystem = subsystem,
                    retryable = self.is_retryable(),
                    "Worker error"
                );
            }
            ErrorSeverity::Warning => {
                tracing::warn!(
                    error = %self,
                    subsystem = subsystem,
                    retryable = self.is_retryable(),
                    "Worker warning"
                );
            }
            ErrorSeverity::Info => {
                tracing::info!(
                    error = %self,
                    subsystem = subsystem,
                    retryable = self.is_retryable(),
                    "Worker info"
                );
            }
        }
    }

    /// Create a command failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::CommandFailed(message.into())
    }

    /// Create a template parse error
    pub fn template_parse(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TemplateParse {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Error severity levels for logging and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that should trigger alerts
    Critical,
    /// Standard errors
    Error,
    /// Warnings for expected failures
    Warning,
    /// Informational messages
    Info,
}

/// Result type alias for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;

// ========== Conversion Implementations ==========

impl From<anyhow::Error> for WorkerError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<WorkerError>() {
            Ok(worker_err) => worker_err,
            Err(err) => Self::Internal(err.to_string()),
        }
    }
}

impl From<librarian_shared_config::ConfigError> for WorkerError {
    fn from(err: librarian_shared_config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(WorkerError::failed("disk full").is_retryable());
        assert!(WorkerError::Mail("smtp down".to_string()).is_retryable());

        assert!(!WorkerError::UnknownCommand("Foo.bar".to_string()).is_retryable());
        assert!(!WorkerError::Cancelled("killed".to_string()).is_retryable());
        assert!(!WorkerError::TemplateCycle("a -> a".to_string()).is_retryable());
    }

    #[test]
    fn test_severity_levels() {
        assert_eq!(
            WorkerError::Configuration("test".to_string()).severity(),
            ErrorSeverity::Critical
        );
        assert_eq!(
            WorkerError::Internal("test".to_string()).severity(),
            ErrorSeverity::Error
        );
        assert_eq!(
            WorkerError::failed("test").severity(),
            ErrorSeverity::Warning
        );
        assert_eq!(
            WorkerError::InvalidArgs("test".to_string()).severity(),
            ErrorSeverity::Info
        );
    }

    #[test]
    fn test_subsystem() {
        assert_eq!(
            WorkerError::UnknownCommand("x".to_string()).subsystem(),
            "dispatch"
        );
        assert_eq!(
            WorkerError::InvalidInterval("soon".to_string()).subsystem(),
            "scheduler"
        );
        assert_eq!(WorkerError::Mail("x".to_string()).subsystem(), "notifications");
    }

    #[test]
    fn test_error_display() {
        let err = WorkerError::failed("tracker unreachable");
        assert_eq!(err.to_string(), "tracker unreachable");

        let err = WorkerError::template_parse("periodic", "expected a table");
        assert_eq!(
            err.to_string(),
            "template 'periodic' is invalid: expected a table"
        );
    }

    #[test]
    fn test_anyhow_downcast_keeps_variant() {
        let err: WorkerError =
            anyhow::Error::new(WorkerError::JobNotFound("abc".to_string())).into();
        assert!(matches!(err, WorkerError::JobNotFound(id) if id == "abc"));

        let err: WorkerError = anyhow::anyhow!("something odd").into();
        assert!(matches!(err, WorkerError::Internal(_)));
    }
}
