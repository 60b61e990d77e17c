//! Error types for Wheelwright.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors, all detected before any job starts
    #[error("Invalid workflow definition: {0}")]
    InvalidWorkflow(String),

    #[error("Invalid condition '{expression}': {message}")]
    InvalidCondition { expression: String, message: String },

    // Step errors
    #[error("Step '{name}' failed with exit code {exit_code}")]
    StepFailed { name: String, exit_code: i32 },

    #[error("Step '{name}' timed out after {seconds} seconds")]
    StepTimeout { name: String, seconds: u64 },

    // Cache errors
    #[error("Cache store error: {0}")]
    CacheStore(String),

    // Release errors
    #[error("Release pipeline error: {0}")]
    Release(String),

    #[error("Publish rejected: {0}")]
    PublishRejected(String),

    // Run errors
    #[error("Run cancelled")]
    Cancelled,

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
