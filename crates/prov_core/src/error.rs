//! Error types for the core module.

use std::path::PathBuf;

use thiserror::Error;

use crate::validate::ValidationError;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur during provisioning.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Bad user input. Only escapes the prompt loop when attempts are bounded.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("No valid {field} after {attempts} attempt(s)")]
    InputExhausted { field: String, attempts: u32 },

    #[error("Input closed while waiting for {0}")]
    InputClosed(String),

    #[error("Prerequisite missing: {0}")]
    PrerequisiteMissing(String),

    #[error("Command failed: {command} (exit code {exit_code}): {message}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        message: String,
    },

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Filesystem error at {path}: {message}")]
    Filesystem { path: PathBuf, message: String },

    #[error("Health check warning: {0}")]
    HealthCheck(String),

    #[error("Context value not yet collected: {0}")]
    MissingContext(&'static str),

    #[error("Invalid workflow state: {0}")]
    InvalidState(String),

    #[error("Invalid workflow definition: {0}")]
    InvalidWorkflow(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Runner error: {0}")]
    Runner(#[from] prov_runner::RunnerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Wrap an IO error with the path it happened on.
    pub fn filesystem(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Filesystem {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Short name of the error kind, for banners and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::InputExhausted { .. } | Self::InputClosed(_) => {
                "ValidationError"
            }
            Self::PrerequisiteMissing(_) => "PrerequisiteMissing",
            Self::CommandFailed { .. } | Self::Verification(_) | Self::Runner(_) => {
                "CommandFailure"
            }
            Self::Filesystem { .. } | Self::Io(_) => "FilesystemError",
            Self::HealthCheck(_) => "HealthCheckWarning",
            Self::MissingContext(_) | Self::InvalidState(_) | Self::InvalidWorkflow(_) => {
                "WorkflowError"
            }
            Self::Config(_) | Self::Serialization(_) => "ConfigurationError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = CoreError::CommandFailed {
            command: "composer install".to_string(),
            exit_code: 2,
            message: "lock file out of date".to_string(),
        };
        assert_eq!(err.kind(), "CommandFailure");
        assert_eq!(
            err.to_string(),
            "Command failed: composer install (exit code 2): lock file out of date"
        );

        assert_eq!(
            CoreError::filesystem("/srv/app/.env", "permission denied").kind(),
            "FilesystemError"
        );
        assert_eq!(
            CoreError::PrerequisiteMissing("composer".into()).kind(),
            "PrerequisiteMissing"
        );
    }
}
