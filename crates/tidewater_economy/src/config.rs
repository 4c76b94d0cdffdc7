//! # Economy Configuration
//!
//! Loaded once at startup from TOML. Every field has a default, so an empty
//! file is a valid configuration for an in-memory ledger.
//!
//! ```toml
//! [store]
//! path = "data/ledger.wal"
//! checkpoint_every = 10000
//!
//! [coordinator]
//! default_timeout_ms = 10000
//!
//! [cache]
//! write_timeout_ms = 5000
//!
//! [events]
//! completed_retention_secs = 300
//! rng_seed = 42
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Ledger store settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// WAL file. `None` keeps the ledger in memory only.
    pub path: Option<PathBuf>,
    /// Fsync every commit. Only tests should turn this off.
    pub sync_on_commit: bool,
    /// Compact the WAL after this many commits (0 = never automatically).
    pub checkpoint_every: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            sync_on_commit: true,
            checkpoint_every: 10_000,
        }
    }
}

/// Transaction coordinator settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Deadline of `run_default` transactions, in milliseconds.
    pub default_timeout_ms: u64,
}

impl CoordinatorConfig {
    /// Returns the default transaction deadline.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { default_timeout_ms: 10_000 }
    }
}

/// Entity cache settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Deadline of a single write-through, in milliseconds.
    pub write_timeout_ms: u64,
    /// Category recorded on log rows written by `apply_delta`.
    pub log_category: String,
}

impl CacheConfig {
    /// Returns the write-through deadline.
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: 5_000,
            log_category: "direct".to_string(),
        }
    }
}

/// Interactive event engine settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long completed instances stay addressable, in seconds.
    pub completed_retention_secs: u64,
    /// Deadline of the resolving transaction, in milliseconds.
    pub resolution_timeout_ms: u64,
    /// Seed for outcome sampling. `None` seeds from entropy.
    pub rng_seed: Option<u64>,
}

impl EngineConfig {
    /// Returns the retention period of completed instances.
    #[must_use]
    pub fn completed_retention(&self) -> Duration {
        Duration::from_secs(self.completed_retention_secs)
    }

    /// Returns the deadline of the resolving transaction.
    #[must_use]
    pub fn resolution_timeout(&self) -> Duration {
        Duration::from_millis(self.resolution_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            completed_retention_secs: 300,
            resolution_timeout_ms: 10_000,
            rng_seed: None,
        }
    }
}

/// Complete economy configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    /// `[store]` section.
    pub store: StoreConfig,
    /// `[coordinator]` section.
    pub coordinator: CoordinatorConfig,
    /// `[cache]` section.
    pub cache: CacheConfig,
    /// `[events]` section.
    pub events: EngineConfig,
}

impl EconomyConfig {
    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed TOML and
    /// `ConfigError::Invalid` for out-of-range values.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read, otherwise as
    /// [`EconomyConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first bad field.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.coordinator.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid("coordinator.default_timeout_ms must be > 0".into()));
        }
        if self.cache.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid("cache.write_timeout_ms must be > 0".into()));
        }
        if self.events.resolution_timeout_ms == 0 {
            return Err(ConfigError::Invalid("events.resolution_timeout_ms must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EconomyConfig::from_toml_str("").unwrap();
        assert_eq!(config, EconomyConfig::default());
        assert_eq!(config.coordinator.default_timeout(), Duration::from_secs(10));
        assert!(config.store.path.is_none());
    }

    #[test]
    fn test_partial_sections() {
        let config = EconomyConfig::from_toml_str(
            r#"
            [store]
            path = "ledger.wal"

            [events]
            rng_seed = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.store.path.as_deref(), Some(Path::new("ledger.wal")));
        assert!(config.store.sync_on_commit);
        assert_eq!(config.events.rng_seed, Some(7));
        assert_eq!(config.events.completed_retention_secs, 300);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = EconomyConfig::from_toml_str("[coordinator]\ndefault_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
