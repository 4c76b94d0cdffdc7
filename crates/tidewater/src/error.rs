//! # Server Error Types

use thiserror::Error;
use tidewater_economy::StoreError;
use tidewater_scheduler::SchedulerError;

/// Startup and shutdown failures of the server process.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The configuration or catalogue could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// The ledger could not be opened or checkpointed.
    #[error("ledger error: {0}")]
    Ledger(#[from] StoreError),

    /// The scheduler rejected its definitions.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
