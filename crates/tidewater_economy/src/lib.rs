//! # Tidewater Economy
//!
//! Transactional ledger and interactive event resolution for the Tidewater
//! game server.
//!
//! ## Design Principles
//!
//! 1. **One source of truth** - The ledger store owns every balance, stack and audit row
//! 2. **All-or-nothing** - Multi-step changes commit atomically or not at all
//! 3. **Exactly once** - An interactive event reaches the ledger at most once
//! 4. **Zero floating point in settlement** - Multipliers are 4-decimal fixed-point
//! 5. **External configuration** - Settings and content live in TOML files
//!
//! ## Layers
//!
//! ```text
//! EventEngine ──> TransactionCoordinator ──> LedgerStore ──> WAL
//!                        │                       ▲
//!                        └──> EntityCache ───────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use tidewater_economy::{Boundaries, Economy, EconomyConfig, OpenRequest, StaticCatalogue};
//!
//! let config = EconomyConfig::load("config/economy.toml")?;
//! let catalogue = StaticCatalogue::load("data/catalogue.toml")?;
//! let economy = Economy::open(&config, Boundaries::new(Arc::new(catalogue)))?;
//!
//! let prompt = economy.events().open(OpenRequest { .. })?;
//! let resolution = economy.events().choose(prompt.event, entity, "accept").await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod catalogue;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod fixed_point;
pub mod integration;
pub mod ledger;
pub mod resolution;
pub mod store;
pub mod telemetry;
pub mod wal;

pub use cache::{CacheStats, EntityCache};
pub use catalogue::{
    Catalogue, ChoiceDefinition, Comparison, ConditionKind, EventDefinition, ItemMetadata, OutcomeDefinition,
    SideEffect, StaticCatalogue, TriggerCondition, TriggerContext,
};
pub use config::{CacheConfig, CoordinatorConfig, EconomyConfig, EngineConfig, StoreConfig};
pub use coordinator::{Committed, TransactionCoordinator, TxnFuture};
pub use error::{
    CacheError, ConfigError, EventError, RuleViolation, SideEffectError, StoreError, TransactionError,
};
pub use events::{
    Decision, EventEngine, EventId, EventState, NullPresenter, NullSideEffects, OpenRequest, Prompt, PromptChoice,
    Presenter, Resolution, ResolutionOutcome, SideEffectReport, SideEffectSink, StakedItem,
};
pub use fixed_point::FixedPoint;
pub use integration::{Boundaries, Economy};
pub use ledger::{EntityId, EntitySnapshot, ItemKey, LedgerKey, LogEntry};
pub use store::{CommitReceipt, LedgerStore, StoreStats, StoreTransaction};
pub use telemetry::{ChannelTelemetry, Counter, NullTelemetry, TelemetrySink};
