//! # Tidewater
//!
//! Server host for the Tidewater fishing economy: one process owning the
//! ledger, the interactive event engine and the ambient scheduler.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod server;

pub use tidewater_economy as economy;
pub use tidewater_scheduler as scheduler;

pub use config::TidewaterConfig;
pub use error::{ServerError, ServerResult};
pub use server::Server;
