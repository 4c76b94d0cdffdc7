//! # Economy Error Types
//!
//! All errors that can occur in the ledger, the cache, the coordinator and
//! the interactive event engine.
//!
//! The layering mirrors the call stack:
//!
//! ```text
//! StoreError ──(classified by the coordinator)──> TransactionError
//!      │                                                │
//!      └──> CacheError                                  └──> ResolutionOutcome
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::ledger::{EntityId, ItemKey};

/// Errors raised by the ledger store and its transactions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Balance would go negative.
    #[error("insufficient funds for entity {entity}: have {available}, delta {delta}")]
    InsufficientFunds {
        /// Entity whose balance was adjusted.
        entity: EntityId,
        /// Balance visible to the transaction.
        available: u64,
        /// Requested adjustment.
        delta: i64,
    },

    /// Item stack would go negative.
    #[error("insufficient items for entity {entity}: need {required} of {item}, have {available}")]
    InsufficientItems {
        /// Entity owning the stack.
        entity: EntityId,
        /// Item key of the stack.
        item: ItemKey,
        /// Quantity the statement tried to remove.
        required: u64,
        /// Quantity visible to the transaction.
        available: u64,
    },

    /// A value would exceed the representable range.
    #[error("arithmetic overflow adjusting entity {0}")]
    Overflow(EntityId),

    /// A transaction body refused to continue for a domain reason.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Statement issued on a transaction that is no longer active.
    #[error("transaction aborted: {0}")]
    Aborted(String),

    /// Write-ahead log I/O failed.
    #[error("wal i/o failed: {0}")]
    Io(String),

    /// Write-ahead log content is not a valid log.
    #[error("wal corrupt: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Wraps an I/O error with the operation that produced it.
    pub(crate) fn io(context: &str, err: &std::io::Error) -> Self {
        Self::Io(format!("{context}: {err}"))
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A business rule refused the transaction. Nothing was changed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleViolation {
    /// Balance would go negative.
    #[error("insufficient funds: have {available}, delta {delta}")]
    InsufficientFunds {
        /// Entity whose balance was adjusted.
        entity: EntityId,
        /// Balance at the time of the check.
        available: u64,
        /// Requested adjustment.
        delta: i64,
    },

    /// Item stack would go negative.
    #[error("insufficient items: need {required} of {item}, have {available}")]
    InsufficientItems {
        /// Entity owning the stack.
        entity: EntityId,
        /// Item key of the stack.
        item: ItemKey,
        /// Quantity requested.
        required: u64,
        /// Quantity at the time of the check.
        available: u64,
    },

    /// A value would overflow.
    #[error("arithmetic overflow for entity {0}")]
    Overflow(EntityId),

    /// Domain-specific refusal raised by the transaction body.
    #[error("{0}")]
    Rejected(String),
}

/// Outcome taxonomy of a coordinated transaction that did not commit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// A business rule failed; the transaction was rolled back.
    #[error("business rule violation: {0}")]
    BusinessRuleViolation(RuleViolation),

    /// The deadline elapsed; the transaction was rolled back. Retryable.
    #[error("system busy: transaction exceeded {timeout:?}")]
    SystemBusy {
        /// Deadline that was exceeded.
        timeout: Duration,
    },

    /// The store failed to persist the transaction.
    #[error("storage failure: {0}")]
    Storage(StoreError),
}

impl TransactionError {
    /// Returns true if the caller may retry the same request.
    #[inline]
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::SystemBusy { .. })
    }
}

impl From<StoreError> for TransactionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientFunds { entity, available, delta } => {
                Self::BusinessRuleViolation(RuleViolation::InsufficientFunds { entity, available, delta })
            }
            StoreError::InsufficientItems { entity, item, required, available } => {
                Self::BusinessRuleViolation(RuleViolation::InsufficientItems {
                    entity,
                    item,
                    required,
                    available,
                })
            }
            StoreError::Overflow(entity) => Self::BusinessRuleViolation(RuleViolation::Overflow(entity)),
            StoreError::Rejected(reason) => Self::BusinessRuleViolation(RuleViolation::Rejected(reason)),
            other @ (StoreError::Aborted(_) | StoreError::Io(_) | StoreError::Corrupt(_)) => Self::Storage(other),
        }
    }
}

/// Result type for coordinated transactions.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors raised by the entity cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The write-through to the store failed; the entry was dropped.
    #[error("cache write-through failed: {0}")]
    Store(#[from] StoreError),

    /// The write-through did not finish before the cache deadline.
    #[error("cache write-through exceeded {0:?}")]
    Busy(Duration),
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors raised by the interactive event engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// No instance with this id (never opened, or already purged).
    #[error("unknown event instance {0}")]
    UnknownEvent(u64),

    /// The catalogue has no definition under this key.
    #[error("unknown event definition: {0}")]
    UnknownDefinition(String),

    /// The catalogue has no metadata for a staked item.
    #[error("unknown item: {0}")]
    UnknownItem(ItemKey),

    /// The acting entity does not hold the items it would stake.
    #[error("entity {entity} stakes {required} of {item} but holds {available}")]
    InsufficientStake {
        /// Acting entity.
        entity: EntityId,
        /// Staked item.
        item: ItemKey,
        /// Total quantity staked.
        required: u64,
        /// Committed quantity held.
        available: u64,
    },

    /// The definition failed validation.
    #[error("invalid event definition {key}: {reason}")]
    InvalidDefinition {
        /// Definition key.
        key: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Another callback already decided this instance.
    #[error("event {0} already decided")]
    AlreadyDecided(u64),

    /// The instance is completed and immutable.
    #[error("event {0} already completed")]
    Completed(u64),

    /// The selection came from an entity other than the acting entity.
    #[error("entity {entity} is not the acting entity of event {event}")]
    NotActingEntity {
        /// Event instance id.
        event: u64,
        /// Entity that attempted the selection.
        entity: EntityId,
    },

    /// The selection names a choice the definition does not have.
    #[error("event {event} has no choice {choice}")]
    UnknownChoice {
        /// Event instance id.
        event: u64,
        /// The unknown choice id.
        choice: String,
    },

    /// The resolution task stopped before producing a result.
    #[error("resolution of event {0} was aborted")]
    ResolutionAborted(u64),
}

/// Result type for event engine operations.
pub type EventResult<T> = Result<T, EventError>;

/// A post-commit side effect could not be applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("side effect failed: {0}")]
pub struct SideEffectError(pub String);

/// Errors raised while loading configuration or catalogue files.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid TOML for the expected schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of its allowed range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_classify_into_taxonomy() {
        let err: TransactionError = StoreError::InsufficientFunds {
            entity: EntityId(1),
            available: 10,
            delta: -20,
        }
        .into();
        assert!(matches!(
            err,
            TransactionError::BusinessRuleViolation(RuleViolation::InsufficientFunds { available: 10, .. })
        ));

        let err: TransactionError = StoreError::Io("disk full".into()).into();
        assert!(matches!(err, TransactionError::Storage(StoreError::Io(_))));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_only_busy_is_retryable() {
        let busy = TransactionError::SystemBusy { timeout: Duration::from_secs(10) };
        assert!(busy.is_retryable());
        let rule = TransactionError::BusinessRuleViolation(RuleViolation::Rejected("closed".into()));
        assert!(!rule.is_retryable());
    }
}
