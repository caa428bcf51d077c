//! services/client/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the hosted backend, without a trailing slash.
    pub backend_url: String,
    /// The publishable API key sent with every request.
    pub anon_key: String,
    /// The pre-registered URL the password-reset email links back to.
    pub reset_redirect_url: String,
    pub log_level: Level,
    pub http_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Backend Settings ---
        let backend_url = std::env::var("BACKEND_URL")
            .map_err(|_| ConfigError::MissingVar("BACKEND_URL".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let anon_key = std::env::var("BACKEND_ANON_KEY")
            .map_err(|_| ConfigError::MissingVar("BACKEND_ANON_KEY".to_string()))?;

        let reset_redirect_url = std::env::var("RESET_REDIRECT_URL")
            .map_err(|_| ConfigError::MissingVar("RESET_REDIRECT_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let http_timeout_str =
            std::env::var("HTTP_TIMEOUT_SECS").unwrap_or_else(|_| "30".to_string());
        let http_timeout_secs = http_timeout_str.parse::<u64>().map_err(|e| {
            ConfigError::InvalidValue("HTTP_TIMEOUT_SECS".to_string(), e.to_string())
        })?;

        Ok(Self {
            backend_url,
            anon_key,
            reset_redirect_url,
            log_level,
            http_timeout: Duration::from_secs(http_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Config::from_env reads process-global state, so the individual cases
    // run inside one test to avoid interleaving with each other.
    #[test]
    fn loads_and_validates_environment() {
        std::env::remove_var("BACKEND_URL");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ref v) if v == "BACKEND_URL"));

        std::env::set_var("BACKEND_URL", "https://backend.example.com/");
        std::env::set_var("BACKEND_ANON_KEY", "anon-key");
        std::env::set_var("RESET_REDIRECT_URL", "https://app.example.com/reset-password");
        std::env::remove_var("RUST_LOG");
        std::env::remove_var("HTTP_TIMEOUT_SECS");

        let config = Config::from_env().expect("config loads");
        // The trailing slash is stripped so URL joining stays predictable.
        assert_eq!(config.backend_url, "https://backend.example.com");
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.http_timeout, Duration::from_secs(30));

        std::env::set_var("HTTP_TIMEOUT_SECS", "not-a-number");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref v, _) if v == "HTTP_TIMEOUT_SECS"));
        std::env::remove_var("HTTP_TIMEOUT_SECS");
    }
}
