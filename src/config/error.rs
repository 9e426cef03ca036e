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

    #[error("Invalid listen address: {0}")]
    InvalidListenAddress(String),

    #[error("WebSocket path must start with '/'")]
    InvalidWsPath,

    #[error("Shutdown grace period must be between 1 and 300 seconds")]
    InvalidShutdownGrace,

    #[error("Write timeout must be positive")]
    InvalidWriteTimeout,

    #[error("JWT secret must be at least {0} bytes in production")]
    SecretTooShort(usize),

    #[error("Token TTL must be positive")]
    InvalidTokenTtl,

    #[error("Invalid broker URL format")]
    InvalidBrokerUrl,

    #[error("Invalid exchange type: {0}")]
    InvalidExchangeType(String),

    #[error("Backoff must be positive and initial must not exceed max")]
    InvalidBackoff,

    #[error("Invalid channel configuration: {0}")]
    InvalidChannels(String),
}
