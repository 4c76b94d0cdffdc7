//! # Server Configuration
//!
//! One TOML file for the whole process. The economy sections sit at the top
//! level; the scheduler lives under `[scheduler]`.
//!
//! ```toml
//! catalogue = "data/catalogue.toml"
//!
//! [store]
//! path = "data/ledger.wal"
//!
//! [scheduler]
//! tick_interval_secs = 60
//!
//! [[scheduler.event]]
//! key = "golden_hour"
//! chance = 0.25
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tidewater_economy::EconomyConfig;
use tidewater_scheduler::SchedulerConfig;

use crate::error::{ServerError, ServerResult};

/// Complete process configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct TidewaterConfig {
    /// `[store]`, `[coordinator]`, `[cache]`, `[events]`.
    #[serde(flatten)]
    pub economy: EconomyConfig,
    /// `[scheduler]` with its `[[scheduler.event]]` definitions.
    pub scheduler: SchedulerConfig,
    /// Catalogue file. `None` starts with an empty catalogue.
    pub catalogue: Option<PathBuf>,
}

impl TidewaterConfig {
    /// Parses and validates a configuration.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` for malformed TOML or invalid values.
    pub fn from_toml_str(text: &str) -> ServerResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ServerError::Config(e.to_string()))?;
        config
            .economy
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> ServerResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_route_to_their_crates() {
        let config = TidewaterConfig::from_toml_str(
            r#"
            catalogue = "data/catalogue.toml"

            [store]
            checkpoint_every = 500

            [events]
            rng_seed = 9

            [scheduler]
            tick_interval_secs = 30

            [[scheduler.event]]
            key = "fog"
            chance = 0.1
            "#,
        )
        .unwrap();

        assert_eq!(config.catalogue, Some(PathBuf::from("data/catalogue.toml")));
        assert_eq!(config.economy.store.checkpoint_every, 500);
        assert_eq!(config.economy.events.rng_seed, Some(9));
        assert_eq!(config.scheduler.tick_interval_secs, 30);
        assert_eq!(config.scheduler.events[0].key, "fog");
    }

    #[test]
    fn test_empty_file_is_a_valid_in_memory_setup() {
        let config = TidewaterConfig::from_toml_str("").unwrap();
        assert!(config.economy.store.path.is_none());
        assert!(config.scheduler.events.is_empty());
    }

    #[test]
    fn test_invalid_economy_values_are_rejected() {
        let err = TidewaterConfig::from_toml_str("[coordinator]\ndefault_timeout_ms = 0\n").unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }
}
