//! Error types for lxdspawn-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] lxdspawn_config::ConfigError),

    #[error("Provider error: {0}")]
    Provider(#[from] lxdspawn_provider::ProviderError),

    #[error("Launch command must not be empty")]
    EmptyCommand,

    #[error("Invalid environment: {0}")]
    InvalidEnvironment(String),

    #[error("Invalid resource limits: {0}")]
    InvalidLimits(String),

    #[error("Invalid container name '{name}': {reason}")]
    InvalidIdentity { name: String, reason: String },

    #[error("Container profile does not exist: {0}")]
    ProfileNotFound(String),

    #[error("No global inet address found for container {0}")]
    NoGlobalAddress(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("State file corrupted: {0}")]
    StateCorrupted(String),

    #[error("Timed out waiting for state lock {0}")]
    StateLocked(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
