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
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid bind host: {0}")]
    InvalidHost(String),

    #[error("Invalid timeout")]
    InvalidTimeout,

    #[error("Invalid broker URL format (expected redis:// or rediss://)")]
    InvalidBrokerUrl,

    #[error("Batch sizes and queue capacities must be positive")]
    InvalidBatchSize,

    #[error("Backoff base exceeds backoff maximum")]
    InvalidBackoff,

    #[error("Ping timeout must exceed a non-zero ping interval")]
    InvalidKeepalive,

    #[error("Production requires an RS256 public key, not a shared secret")]
    SharedSecretInProduction,
}
