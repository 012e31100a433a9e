//! Error types used across the Codebox runtime.

use thiserror::Error;

/// Result type for Codebox operations.
pub type CodeboxResult<T> = Result<T, CodeboxError>;

#[derive(Debug, Error)]
pub enum CodeboxError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("cgroup error: {0}")]
    Cgroup(String),

    /// A virtual source path escaped the scratch directory. The payload is
    /// the resolved path and the rendered message is what the client sees.
    #[error("Invalid file path: {0}")]
    InvalidPath(String),

    #[error("staging error: {0}")]
    Staging(String),

    #[error("spawn error: {0}")]
    Spawn(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for CodeboxError {
    fn from(err: std::io::Error) -> Self {
        CodeboxError::Internal(format!("I/O error: {}", err))
    }
}

impl From<serde_json::Error> for CodeboxError {
    fn from(err: serde_json::Error) -> Self {
        CodeboxError::Internal(format!("JSON error: {}", err))
    }
}

impl From<String> for CodeboxError {
    fn from(err: String) -> Self {
        CodeboxError::Internal(err)
    }
}

impl From<&str> for CodeboxError {
    fn from(err: &str) -> Self {
        CodeboxError::Internal(err.to_string())
    }
}
