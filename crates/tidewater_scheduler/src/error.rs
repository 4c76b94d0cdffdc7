//! # Scheduler Error Types

use thiserror::Error;

/// Errors raised by the ambient event scheduler.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// The definitions file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The definitions file is not valid TOML for the expected schema.
    #[error("failed to parse scheduler config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Two definitions share a key.
    #[error("duplicate ambient event key {0}")]
    DuplicateKey(String),

    /// No definition with this key.
    #[error("unknown ambient event {0}")]
    UnknownDefinition(String),

    /// The definition exists but can never fire.
    #[error("ambient event {key} is never eligible: {reason}")]
    NeverEligible {
        /// Definition key.
        key: String,
        /// Validation failure.
        reason: String,
    },

    /// Another ambient event holds the slot.
    #[error("ambient event {0} is already active")]
    AlreadyActive(String),

    /// No ambient event is active.
    #[error("no ambient event is active")]
    NothingActive,
}

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;
