//! Error types for container providers

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Failed to connect to LXD: {0}")]
    ConnectionError(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("LXD API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Exec failed: {0}")]
    ExecError(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Unexpected response from LXD: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Timeout waiting for operation")]
    Timeout,
}

impl ProviderError {
    /// Whether this error means the addressed object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ContainerNotFound(_) | Self::Api { code: 404, .. })
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
