//! Crate-level error types.
//!
//! Subsystem errors live next to their code (`exec`, `admin`, `capture`);
//! this module holds the errors shared by configuration loading.

use thiserror::Error;

/// Errors raised while resolving configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable is set but cannot be parsed.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What was wrong with it.
        message: String,
    },

    /// The environment could not be read.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}
