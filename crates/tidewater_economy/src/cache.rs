//! # Entity Cache
//!
//! Write-through view of the ledger for hot entities. The cache is never
//! authoritative: an entry is either consistent with the store or absent.
//!
//! ```text
//! get(id) ──> per-entity mutex ──> entry.version == store version ? memory : reload
//!
//! apply_delta(id) ──> per-entity mutex ──> store txn + commit ──> patch entry ──> telemetry
//!                                                │
//!                                                └── failure ──> drop entry
//! ```
//!
//! The per-entity mutex is held only across its own "write store, then
//! update memory" section, never across anything else.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult, StoreError};
use crate::ledger::{EntityId, EntitySnapshot, LedgerKey, LogEntry};
use crate::store::LedgerStore;
use crate::telemetry::{NullTelemetry, TelemetrySink};

type Slot = Arc<Mutex<Option<EntitySnapshot>>>;

struct CacheInner {
    store: LedgerStore,
    entries: DashMap<EntityId, Slot>,
    telemetry: Arc<dyn TelemetrySink>,
    config: CacheConfig,
    hits: AtomicU64,
    loads: AtomicU64,
}

/// Per-entity serialized, write-through cache. Cheap to clone.
#[derive(Clone)]
pub struct EntityCache {
    inner: Arc<CacheInner>,
}

/// Cache statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served from memory.
    pub hits: u64,
    /// Full entity loads from the store.
    pub loads: u64,
    /// Entities with a slot (loaded or not).
    pub slots: usize,
}

impl std::fmt::Debug for EntityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCache").field("stats", &self.stats()).finish()
    }
}

impl EntityCache {
    /// Creates an empty cache over `store` whose counters are discarded.
    #[must_use]
    pub fn new(store: LedgerStore, config: CacheConfig) -> Self {
        Self::with_telemetry(store, config, Arc::new(NullTelemetry))
    }

    /// Creates an empty cache over `store` that reports every committed
    /// write-through to `telemetry`.
    #[must_use]
    pub fn with_telemetry(store: LedgerStore, config: CacheConfig, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                store,
                entries: DashMap::new(),
                telemetry,
                config,
                hits: AtomicU64::new(0),
                loads: AtomicU64::new(0),
            }),
        }
    }

    /// Returns one value of an entity.
    pub async fn get(&self, entity: EntityId, key: &LedgerKey) -> u64 {
        let slot = self.slot(entity);
        let mut entry = slot.lock().await;
        self.fresh(entity, &mut entry).value(key)
    }

    /// Returns the whole cached view of an entity.
    pub async fn get_all(&self, entity: EntityId) -> EntitySnapshot {
        let slot = self.slot(entity);
        let mut entry = slot.lock().await;
        self.fresh(entity, &mut entry).clone()
    }

    /// Applies a single-value delta through the store, then to memory.
    ///
    /// Balance deltas also append an audit row whose reason is `tag`.
    /// Returns the committed value. The commit's counters reach the
    /// telemetry sink only after the entry is patched.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Store` if the store refused or failed the write
    /// and `CacheError::Busy` if it did not finish in time. The entry is
    /// dropped in both cases and reloads on next access.
    pub async fn apply_delta(&self, entity: EntityId, key: LedgerKey, delta: i64, tag: &str) -> CacheResult<u64> {
        let slot = self.slot(entity);
        let mut entry = slot.lock().await;

        let store = &self.inner.store;
        let category = &self.inner.config.log_category;
        let write = async {
            let mut txn = store.begin_transaction();
            let value = match &key {
                LedgerKey::Balance => {
                    let value = txn.adjust_balance(entity, delta).await?;
                    txn.append_log_entry(LogEntry::new(entity, delta, tag, category.as_str()))?;
                    value
                }
                LedgerKey::Item(item) => txn.adjust_item_quantity(entity, item, delta).await?,
            };
            let receipt = txn.commit()?;
            Ok::<_, StoreError>((value, receipt))
        };

        let timeout = self.inner.config.write_timeout();
        match tokio::time::timeout(timeout, write).await {
            Ok(Ok((value, receipt))) => {
                let version = receipt
                    .versions
                    .iter()
                    .find(|(id, _)| *id == entity)
                    .map(|(_, version)| *version);
                Self::patch(&mut entry, &key, value, version);
                drop(entry);
                for counter in receipt.into_counters() {
                    self.inner.telemetry.emit(counter);
                }
                Ok(value)
            }
            Ok(Err(err)) => {
                *entry = None;
                debug!(%entity, error = %err, tag, "cache write-through refused");
                Err(CacheError::Store(err))
            }
            Err(_) => {
                *entry = None;
                warn!(%entity, ?timeout, tag, "cache write-through timed out");
                Err(CacheError::Busy(timeout))
            }
        }
    }

    /// Drops the cached view of an entity.
    pub async fn invalidate(&self, entity: EntityId) {
        let slot = self.inner.entries.get(&entity).map(|slot| Arc::clone(slot.value()));
        if let Some(slot) = slot {
            *slot.lock().await = None;
        }
    }

    /// Returns the cached view without loading it.
    pub async fn peek(&self, entity: EntityId) -> Option<EntitySnapshot> {
        let slot = self.inner.entries.get(&entity).map(|slot| Arc::clone(slot.value()))?;
        let entry = slot.lock().await;
        entry.clone()
    }

    /// Returns cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            loads: self.inner.loads.load(Ordering::Relaxed),
            slots: self.inner.entries.len(),
        }
    }

    fn slot(&self, entity: EntityId) -> Slot {
        Arc::clone(self.inner.entries.entry(entity).or_default().value())
    }

    /// Returns the entry, reloading it if absent or behind the store.
    fn fresh<'a>(&self, entity: EntityId, entry: &'a mut MutexGuard<'_, Option<EntitySnapshot>>) -> &'a EntitySnapshot {
        let current = self.inner.store.entity_version(entity);
        let stale = entry.as_ref().map_or(true, |snapshot| snapshot.version != current);
        if stale {
            self.inner.loads.fetch_add(1, Ordering::Relaxed);
            debug!(%entity, version = current, "cache load");
            **entry = Some(self.inner.store.read_snapshot(entity));
        } else {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
        }
        entry.get_or_insert_with(EntitySnapshot::default)
    }

    /// Patches a loaded entry with a committed value.
    ///
    /// Every commit bumps the entity version by exactly one, so the entry is
    /// only patchable if it was current right before this commit.
    fn patch(entry: &mut Option<EntitySnapshot>, key: &LedgerKey, value: u64, version: Option<u64>) {
        let (Some(snapshot), Some(version)) = (entry.as_mut(), version) else {
            *entry = None;
            return;
        };
        if snapshot.version + 1 != version {
            *entry = None;
            return;
        }
        match key {
            LedgerKey::Balance => snapshot.balance = value,
            LedgerKey::Item(item) => {
                if value == 0 {
                    snapshot.items.remove(item);
                } else {
                    snapshot.items.insert(item.clone(), value);
                }
            }
        }
        snapshot.version = version;
    }
}
