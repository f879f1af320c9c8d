//! Error types for Mediaq

use thiserror::Error;

/// Result type alias for Mediaq operations
pub type Result<T> = std::result::Result<T, MediaqError>;

/// Main error type for the shared library
#[derive(Error, Debug)]
pub enum MediaqError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown pipeline stage: {0}")]
    UnknownStage(String),

    #[error("Unknown task status: {0}")]
    UnknownStatus(String),

    #[error("Invalid cache file name: {0}")]
    InvalidFileKey(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
