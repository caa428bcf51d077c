//! services/client/src/error.rs
//!
//! Defines the primary error type for the entire client service.

use crate::config::ConfigError;
use taskdeck_core::ports::PortError;
use taskdeck_core::validate::ValidationError;

/// The primary error type for the `client` service.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents a local input-validation failure that never reached the network.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Represents an error from the underlying HTTP client library.
    #[error("HTTP Error: {0}")]
    Http(#[from] reqwest::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}
