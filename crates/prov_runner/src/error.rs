//! Error types for the runner module.

use thiserror::Error;

/// Result type alias for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors that can occur during runner operations.
///
/// A command that starts and exits non-zero is not an error at this level;
/// it comes back as a [`crate::CommandOutput`] with its exit code.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to spawn {program}: {message}")]
    SpawnFailed { program: String, message: String },

    #[error("HTTP probe failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
