//! # Tidewater Scheduler
//!
//! Server-wide ambient events (golden hour, fog, festivals) that switch on
//! inside authored day and time windows and last for a fixed duration.
//!
//! ## Rules
//!
//! 1. **Single-flight** - At most one ambient event is active
//! 2. **Priority first** - Candidates are drawn against in descending priority
//! 3. **Fail closed** - A misconfigured definition never fires
//!
//! ## Example
//!
//! ```rust,ignore
//! use tidewater_scheduler::{Scheduler, SchedulerConfig};
//!
//! let config = SchedulerConfig::load("config/scheduler.toml")?;
//! let scheduler = Arc::new(Scheduler::new(&config)?);
//! let announcements = scheduler.subscribe(64);
//! tokio::spawn(async move { scheduler.run(config.tick_interval(), shutdown).await });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod definition;
pub mod error;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use definition::{AmbientDefinition, TimeRange, Window};
pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{ActiveEvent, Scheduler, SchedulerEvent, TickOutcome};
