//! # Scheduler Configuration
//!
//! ```toml
//! tick_interval_secs = 60
//! rng_seed = 7
//!
//! [[event]]
//! key = "golden_hour"
//! chance = 0.25
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::definition::AmbientDefinition;
use crate::error::{SchedulerError, SchedulerResult};

/// Scheduler settings and definitions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between ticks.
    pub tick_interval_secs: u64,
    /// Seed for trigger draws. `None` seeds from entropy.
    pub rng_seed: Option<u64>,
    /// Definitions in declaration order.
    #[serde(rename = "event")]
    pub events: Vec<AmbientDefinition>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            rng_seed: None,
            events: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    /// Tick interval as a duration (at least one second).
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Parse` for malformed TOML.
    pub fn from_toml_str(text: &str) -> SchedulerResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Io` if the file cannot be read, otherwise as
    /// [`SchedulerConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> SchedulerResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SchedulerError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tables_parse_with_defaults() {
        let config = SchedulerConfig::from_toml_str(
            r#"
            rng_seed = 7

            [[event]]
            key = "golden_hour"
            priority = 10
            chance = 0.25
            time_ranges = ["17:00-19:30"]

            [event.effects]
            sell_multiplier = 1.5

            [[event]]
            key = "fog"
            "#,
        )
        .unwrap();

        assert_eq!(config.tick_interval_secs, 60);
        assert_eq!(config.rng_seed, Some(7));
        assert_eq!(config.events.len(), 2);
        assert_eq!(config.events[0].effects["sell_multiplier"], 1.5);
        assert_eq!(config.events[1].duration_minutes, 30);
        assert!(config.events[1].days.is_empty());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = SchedulerConfig::load("/nonexistent/scheduler.toml").unwrap_err();
        assert!(matches!(err, SchedulerError::Io { .. }));
    }
}
