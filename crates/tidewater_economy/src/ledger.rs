//! # Ledger Types
//!
//! The vocabulary shared by the store, the cache and the event engine.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of an entity (player account) in the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key of an item type, as named by the content catalogue.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemKey(String);

impl ItemKey {
    /// Creates an item key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Addresses one value of an entity: its balance or one of its item stacks.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LedgerKey {
    /// The currency balance.
    Balance,
    /// The quantity of one item stack.
    Item(ItemKey),
}

/// One append-only audit row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    /// Entity the amount was applied to.
    pub entity: EntityId,
    /// Signed currency amount.
    pub amount: i64,
    /// Machine-readable reason tag.
    pub reason: String,
    /// Activity category the row is filed under.
    pub category: String,
    /// Wall-clock time the row was staged (millisecond precision).
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    /// Creates a log entry stamped with the current time.
    #[must_use]
    pub fn new(entity: EntityId, amount: i64, reason: impl Into<String>, category: impl Into<String>) -> Self {
        let now = Utc::now();
        // Truncate to the precision the WAL stores so replay is exact.
        let timestamp = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        Self {
            entity,
            amount,
            reason: reason.into(),
            category: category.into(),
            timestamp,
        }
    }
}

/// Committed state of one entity, read atomically.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntitySnapshot {
    /// Currency balance.
    pub balance: u64,
    /// Non-empty item stacks.
    pub items: BTreeMap<ItemKey, u64>,
    /// Number of commits that have touched the entity.
    pub version: u64,
}

impl EntitySnapshot {
    /// Returns the value addressed by `key`. Absent stacks read as zero.
    #[must_use]
    pub fn value(&self, key: &LedgerKey) -> u64 {
        match key {
            LedgerKey::Balance => self.balance,
            LedgerKey::Item(item) => self.items.get(item).copied().unwrap_or(0),
        }
    }
}
