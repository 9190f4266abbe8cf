//! Error types for test timeout enforcement

use std::io;
use thiserror::Error;

/// Result type alias for timeout operations
pub type Result<T> = std::result::Result<T, TimeoutError>;

/// Main error type for timeout operations
#[derive(Debug, Error)]
pub enum TimeoutError {
    /// A directive or configuration layer carried malformed values.
    /// Local to the test being set up; the rest of the run continues.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// The requested strategy cannot run on this host.
    #[error("Timeout strategy unavailable: {0}")]
    StrategyUnavailable(String),

    /// A timer of the same strategy is still armed.
    #[error("A timeout timer is already armed")]
    AlreadyArmed,

    /// An underlying OS call failed.
    #[error("Platform error: {0}")]
    Platform(String),

    /// An underlying I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Validation failures while resolving a timeout policy
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A seconds value could not be converted to a non-negative number.
    #[error("ValueError: could not convert {value:?} to a non-negative number of seconds")]
    Conversion { value: String },

    /// The directive had the wrong number or shape of positional arguments.
    #[error("TypeError: timeout directive expects (seconds[, method]): {detail}")]
    Arity { detail: String },

    /// A method name that is neither `signal` nor `thread`.
    #[error("ValueError: invalid timeout method {value:?}, expected one of: signal, thread")]
    UnknownMethod { value: String },
}

impl TimeoutError {
    /// Whether this error comes from configuration rather than the platform
    pub fn is_configuration(&self) -> bool {
        matches!(self, TimeoutError::Configuration(_))
    }
}
