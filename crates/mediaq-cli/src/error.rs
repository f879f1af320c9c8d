//! Error types for the Mediaq CLI and library
//!
//! Messages are user facing: each says what went wrong and what to try.
//! [`CliError::is_retriable`] is the single place that decides whether a
//! failure is worth another attempt.

use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// The object exists in none of cache, mirror or remote store
    #[error("Object not found: '{0}'. Check the remote id; it is absent from the cache, the mirror and the remote store.")]
    ObjectNotFound(String),

    /// File system operation failed
    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    /// Remote store failed while reading or probing
    #[error("Remote store error: {0}. The request will be retried; check connectivity and credentials if it persists.")]
    Remote(String),

    /// Remote store failed while publishing an artifact
    #[error("Upload failed: {0}. The publish stage will be retried.")]
    Upload(String),

    /// Status database operation failed
    #[error("Status database error: {0}. Check the status database path in your configuration.")]
    Database(#[from] sqlx::Error),

    /// HTTP request failed
    #[error("Network request failed: {0}. Check the transformation service URL and your connection.")]
    Http(#[from] reqwest::Error),

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}. Check your config file or MEDIAQ_* environment variables.")]
    Config(String),

    /// Cache bookkeeping failed
    #[error("Cache error: {0}. Run 'mediaq clean' or remove the cache index to force a rescan.")]
    Cache(String),

    /// Caller supplied something unusable
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Task group id unknown to the status store
    #[error("Task group '{0}' not found. Run 'mediaq status' to list recent groups.")]
    GroupNotFound(String),

    /// JSON parsing failed
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("Failed to parse config file: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Error from the shared library
    #[error(transparent)]
    Common(#[from] mediaq_common::MediaqError),

    /// Generic anyhow error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    pub fn upload(msg: impl Into<String>) -> Self {
        Self::Upload(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether a later attempt of the same operation can succeed.
    ///
    /// Missing objects and bad input or configuration are permanent;
    /// disk, network, remote-store and database conditions are transient.
    pub fn is_retriable(&self) -> bool {
        match self {
            CliError::ObjectNotFound(_)
            | CliError::Config(_)
            | CliError::InvalidInput(_)
            | CliError::GroupNotFound(_)
            | CliError::TomlParse(_) => false,
            CliError::Io(_)
            | CliError::Remote(_)
            | CliError::Upload(_)
            | CliError::Database(_)
            | CliError::Http(_)
            | CliError::Cache(_)
            | CliError::JsonParse(_)
            | CliError::Common(_)
            | CliError::Other(_) => true,
        }
    }
}
