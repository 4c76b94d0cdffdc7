//! # Integration API
//!
//! **The ledger front door.** Wires store, cache, coordinator and event
//! engine from one [`EconomyConfig`] so the host process has a single handle.
//!
//! ```text
//!   host ──> Economy::open(config, boundaries)
//!               │
//!               ├── LedgerStore        (WAL replay)
//!               ├── EntityCache        (reads, direct deltas)
//!               ├── TransactionCoordinator (multi-step commits)
//!               └── EventEngine        (interactive prompts)
//! ```

use std::sync::Arc;

use tracing::info;

use crate::cache::EntityCache;
use crate::catalogue::Catalogue;
use crate::config::EconomyConfig;
use crate::coordinator::TransactionCoordinator;
use crate::error::StoreResult;
use crate::events::{EventEngine, NullPresenter, NullSideEffects, Presenter, SideEffectSink};
use crate::store::{LedgerStore, StoreStats};
use crate::telemetry::{NullTelemetry, TelemetrySink};

/// External collaborators of the economy.
#[derive(Clone)]
pub struct Boundaries {
    /// Authored content.
    pub catalogue: Arc<dyn Catalogue>,
    /// Renders prompts.
    pub presenter: Arc<dyn Presenter>,
    /// Applies post-commit effects.
    pub side_effects: Arc<dyn SideEffectSink>,
    /// Receives post-commit counters.
    pub telemetry: Arc<dyn TelemetrySink>,
}

impl Boundaries {
    /// Headless boundaries around `catalogue`.
    #[must_use]
    pub fn new(catalogue: Arc<dyn Catalogue>) -> Self {
        Self {
            catalogue,
            presenter: Arc::new(NullPresenter),
            side_effects: Arc::new(NullSideEffects),
            telemetry: Arc::new(NullTelemetry),
        }
    }

    /// Replaces the presenter.
    #[must_use]
    pub fn with_presenter(mut self, presenter: Arc<dyn Presenter>) -> Self {
        self.presenter = presenter;
        self
    }

    /// Replaces the side-effect sink.
    #[must_use]
    pub fn with_side_effects(mut self, side_effects: Arc<dyn SideEffectSink>) -> Self {
        self.side_effects = side_effects;
        self
    }

    /// Replaces the telemetry sink.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }
}

/// Running economy. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Economy {
    store: LedgerStore,
    coordinator: TransactionCoordinator,
    engine: EventEngine,
}

impl Economy {
    /// Opens the ledger described by `config` and builds every component on top.
    ///
    /// # Errors
    ///
    /// Returns the store error if the WAL cannot be opened or replayed.
    pub fn open(config: &EconomyConfig, boundaries: Boundaries) -> StoreResult<Self> {
        let store = LedgerStore::from_config(&config.store)?;
        let cache = EntityCache::with_telemetry(store.clone(), config.cache.clone(), Arc::clone(&boundaries.telemetry));
        let coordinator = TransactionCoordinator::new(
            store.clone(),
            cache,
            boundaries.telemetry,
            config.coordinator.clone(),
        );
        let engine = EventEngine::new(
            coordinator.clone(),
            boundaries.catalogue,
            boundaries.presenter,
            boundaries.side_effects,
            config.events.clone(),
        );

        info!(durable = config.store.path.is_some(), "economy online");
        Ok(Self { store, coordinator, engine })
    }

    /// The ledger store.
    #[must_use]
    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    /// The entity cache.
    #[must_use]
    pub fn cache(&self) -> &EntityCache {
        self.coordinator.cache()
    }

    /// The transaction coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    /// The interactive event engine.
    #[must_use]
    pub fn events(&self) -> &EventEngine {
        &self.engine
    }

    /// Store counters.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// Compacts the WAL and syncs it.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the checkpoint cannot be written.
    pub fn shutdown(&self) -> StoreResult<()> {
        self.store.checkpoint()?;
        info!(stats = ?self.store.stats(), "economy shut down");
        Ok(())
    }
}
