//! services/tracker/src/error.rs
//!
//! Defines the primary error type for the tracker library.

use crate::config::ConfigError;
use xapi_core::ports::PortError;

/// The primary error type for the `tracker` library.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service port error: {0}")]
    Port(#[from] PortError),

    /// Represents a failure resolving the launch parameters or credentials.
    #[error("Launch error: {0}")]
    Launch(String),

    /// Represents a malformed URL in configuration or launch data.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Represents an HTTP failure outside the record-store port (token
    /// exchange, attachment resolution).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Represents a JSON serialization failure.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// A convenience type alias for `Result<T, TrackerError>`.
pub type TrackerResult<T> = Result<T, TrackerError>;
