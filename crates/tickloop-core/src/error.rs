//! Core error types for tickloop-core.
//!
//! Malformed registration input is surfaced as a typed error rather than a
//! silent no-op; callback panics are reported through the event sink and
//! never reach a caller as an error value.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for tickloop-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Rejected registration or mutation input
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Configuration-related errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Timer id must be non-empty
    #[error("timer id must not be empty")]
    EmptyId,

    /// Tick interval must be positive
    #[error("timer interval must be greater than zero")]
    ZeroInterval,

    /// Operation addressed an id with no live timer
    #[error("no timer registered under id '{0}'")]
    UnknownId(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to prepare the configuration directory
    #[error("failed to prepare config directory {path}: {message}")]
    DirFailed { path: PathBuf, message: String },

    /// Failed to load configuration
    #[error("failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
