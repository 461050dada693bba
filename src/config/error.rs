//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid bind address: {0}")]
    InvalidAddress(String),

    #[error("Invalid request timeout")]
    InvalidTimeout,

    #[error("Invalid Redis URL format")]
    InvalidRedisUrl,

    #[error("Invalid channel prefix")]
    InvalidChannelPrefix,

    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),

    #[error("Jitter must be between 0.0 and 1.0")]
    InvalidJitter,

    #[error("max_backoff_ms is lower than initial_backoff_ms")]
    InvalidBackoffRange,

    #[error("Store file name must be a plain file name")]
    InvalidFileName,
}
