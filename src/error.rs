//! Error taxonomy shared by the catalog, provisioner, runtime adapter and
//! introspection code.
//!
//! Callers that need to react to a failure (for example the HTTP layer
//! choosing a status code) should match on [`ServerError::kind`] rather than
//! on individual variants.

use crate::executor::ExecutorError;
use std::time::Duration;

/// Coarse classification of a [`ServerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    ExternalProcessFailure,
    Timeout,
    NotRunning,
    Conflict,
    Cancelled,
    Internal,
}

/// Errors produced while provisioning or inspecting test-server containers.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Unknown server type, container or request id
    #[error("{0} not found")]
    NotFound(String),

    /// Malformed caller input (bad MIME, oversize upload, bad parameter)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Relative path rejected before any engine call
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Local image build exited non-zero
    #[error("Image build failed for {image}: {output}")]
    BuildFailed { image: String, output: String },

    /// Registry pull exited non-zero
    #[error("Image pull failed for {image}: {output}")]
    PullFailed { image: String, output: String },

    /// `run -d` exited non-zero
    #[error("Container start failed for {name}: {output}")]
    StartFailed { name: String, output: String },

    /// `rm -f` exited non-zero
    #[error("Container stop failed for {id}: {output}")]
    StopFailed { id: String, output: String },

    /// Any other engine invocation that exited non-zero
    #[error("Command `{command}` failed: {output}")]
    ExternalProcess { command: String, output: String },

    /// An HTTP service inside a container answered badly or not at all
    #[error("{service} request failed: {message}")]
    Upstream { service: String, message: String },

    /// A bounded operation ran past its deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The operation needs a live container but the record says otherwise
    #[error("Container {0} is not running")]
    NotRunning(String),

    /// Persistence uniqueness violation (duplicate id or name)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The caller's cancellation token fired
    #[error("Operation cancelled")]
    Cancelled,

    /// Process spawning or pipe failure
    #[error("Executor error: {0}")]
    Executor(ExecutorError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidInput(_) | Self::InvalidPath(_) => ErrorKind::InvalidInput,
            Self::BuildFailed { .. }
            | Self::PullFailed { .. }
            | Self::StartFailed { .. }
            | Self::StopFailed { .. }
            | Self::ExternalProcess { .. }
            | Self::Upstream { .. } => ErrorKind::ExternalProcessFailure,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::NotRunning(_) => ErrorKind::NotRunning,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Executor(_) | Self::Io(_) | Self::Serialization(_) => ErrorKind::Internal,
        }
    }
}

impl From<ExecutorError> for ServerError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::Timeout(limit) => Self::Timeout(limit),
            ExecutorError::Cancelled => Self::Cancelled,
            other => Self::Executor(other),
        }
    }
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executor_timeouts_and_cancellation_keep_their_kind() {
        let timeout: ServerError = ExecutorError::Timeout(Duration::from_secs(5)).into();
        assert_eq!(timeout.kind(), ErrorKind::Timeout);

        let cancelled: ServerError = ExecutorError::Cancelled.into();
        assert_eq!(cancelled.kind(), ErrorKind::Cancelled);

        let other: ServerError = ExecutorError::Other("boom".to_string()).into();
        assert_eq!(other.kind(), ErrorKind::Internal);
    }

    #[test]
    fn engine_failures_are_external_process_failures() {
        let err = ServerError::PullFailed {
            image: "mailhog/mailhog:latest".to_string(),
            output: "manifest unknown".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::ExternalProcessFailure);
        assert!(err.to_string().contains("manifest unknown"));
    }
}
