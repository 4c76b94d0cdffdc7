//! # Ledger Store
//!
//! **The only source of truth for balances, item stacks and the audit log.**
//!
//! Committed state lives in memory behind a read-write lock and on disk in
//! the write-ahead log. A transaction stages post-images privately, holding
//! the row lock of every entity it touches, and publishes them in one step:
//!
//! ```text
//! adjust_*() ──> row lock ──> re-read (staged or committed) ──> check >= 0 ──> stage
//!                                                                               │
//! commit() ──> WAL append + fsync ──> apply to committed tables ──> release row locks
//! ```
//!
//! ## Guarantees
//!
//! 1. **Isolation**: staged values are invisible until commit returns
//! 2. **No negatives**: every statement re-checks against the value it will overwrite
//! 3. **All-or-nothing**: a failed statement poisons the transaction; dropping it rolls back
//! 4. **No torn commits**: `commit()` is synchronous, so it cannot be cancelled halfway
//!
//! Row locks are acquired in statement order. Two transactions locking the
//! same entities in opposite order wait on each other until the coordinator
//! deadline fires and rolls one of them back.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::ledger::{EntityId, EntitySnapshot, ItemKey, LogEntry};
use crate::telemetry::Counter;
use crate::wal::{WalOp, WalWriter};

/// Committed tables.
#[derive(Debug, Default)]
struct CommittedState {
    /// `accounts`: entity -> balance.
    balances: HashMap<EntityId, u64>,
    /// `item_stacks`: unique on (entity, item). Zero stacks are absent.
    items: HashMap<EntityId, BTreeMap<ItemKey, u64>>,
    /// Commits that touched each entity.
    versions: HashMap<EntityId, u64>,
    /// Append-only audit log.
    log: Vec<LogEntry>,
}

impl CommittedState {
    fn balance(&self, entity: EntityId) -> u64 {
        self.balances.get(&entity).copied().unwrap_or(0)
    }

    fn quantity(&self, entity: EntityId, item: &ItemKey) -> u64 {
        self.items
            .get(&entity)
            .and_then(|stacks| stacks.get(item))
            .copied()
            .unwrap_or(0)
    }

    fn version(&self, entity: EntityId) -> u64 {
        self.versions.get(&entity).copied().unwrap_or(0)
    }

    /// Applies one post-image.
    fn apply(&mut self, op: &WalOp) {
        match op {
            WalOp::SetBalance { entity, balance } => {
                self.balances.insert(*entity, *balance);
            }
            WalOp::SetItem { entity, item, quantity } => {
                if *quantity == 0 {
                    if let Some(stacks) = self.items.get_mut(entity) {
                        stacks.remove(item);
                        if stacks.is_empty() {
                            self.items.remove(entity);
                        }
                    }
                } else {
                    self.items.entry(*entity).or_default().insert(item.clone(), *quantity);
                }
            }
            WalOp::AppendLog(entry) => self.log.push(entry.clone()),
        }
    }

    /// Applies a whole transaction and bumps the version of every entity it touched.
    fn apply_transaction(&mut self, ops: &[WalOp]) -> Vec<(EntityId, u64)> {
        let mut touched = BTreeSet::new();
        for op in ops {
            self.apply(op);
            touched.insert(op_entity(op));
        }
        touched
            .into_iter()
            .map(|entity| {
                let version = self.versions.entry(entity).or_insert(0);
                *version += 1;
                (entity, *version)
            })
            .collect()
    }

    /// The full state as post-images, for checkpoints.
    fn image(&self) -> Vec<WalOp> {
        let mut ops = Vec::with_capacity(self.balances.len() + self.log.len());
        let mut balances: Vec<_> = self.balances.iter().collect();
        balances.sort_unstable();
        ops.extend(
            balances
                .into_iter()
                .map(|(entity, balance)| WalOp::SetBalance { entity: *entity, balance: *balance }),
        );
        let mut owners: Vec<_> = self.items.keys().copied().collect();
        owners.sort_unstable();
        for entity in owners {
            for (item, quantity) in &self.items[&entity] {
                ops.push(WalOp::SetItem { entity, item: item.clone(), quantity: *quantity });
            }
        }
        ops.extend(self.log.iter().cloned().map(WalOp::AppendLog));
        ops
    }
}

fn op_entity(op: &WalOp) -> EntityId {
    match op {
        WalOp::SetBalance { entity, .. } | WalOp::SetItem { entity, .. } => *entity,
        WalOp::AppendLog(entry) => entry.entity,
    }
}

/// Store statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Transactions committed since open.
    pub commits: u64,
    /// Transactions rolled back (explicitly, by failure, or by drop) since open.
    pub rollbacks: u64,
    /// Entities with an account row.
    pub accounts: usize,
    /// Rows in the audit log.
    pub log_entries: usize,
    /// Size of the WAL in bytes (`None` for in-memory stores).
    pub wal_bytes: Option<u64>,
}

struct StoreInner {
    state: RwLock<CommittedState>,
    /// Lock order: `wal` before `state`.
    wal: Mutex<Option<WalWriter>>,
    row_locks: DashMap<EntityId, Arc<tokio::sync::Mutex<()>>>,
    config: StoreConfig,
    next_txn: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    commits_since_checkpoint: AtomicU64,
}

/// Durable, transactional ledger. Cheap to clone.
#[derive(Clone)]
pub struct LedgerStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for LedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerStore").field("stats", &self.stats()).finish()
    }
}

impl LedgerStore {
    fn with_parts(state: CommittedState, wal: Option<WalWriter>, config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(state),
                wal: Mutex::new(wal),
                row_locks: DashMap::new(),
                config,
                next_txn: AtomicU64::new(1),
                commits: AtomicU64::new(0),
                rollbacks: AtomicU64::new(0),
                commits_since_checkpoint: AtomicU64::new(0),
            }),
        }
    }

    /// Creates a store that keeps everything in memory.
    #[must_use]
    pub fn in_memory(config: StoreConfig) -> Self {
        Self::with_parts(CommittedState::default(), None, config)
    }

    /// Opens (or creates) a WAL-backed store and replays committed transactions.
    ///
    /// A torn tail left by a crash is truncated; transactions without an
    /// intact COMMIT record are discarded.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` on I/O failure and `StoreError::Corrupt` if
    /// the file is not a WAL.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> StoreResult<Self> {
        let path = path.as_ref();
        let (wal, recovered) = WalWriter::open(path, config.sync_on_commit)?;

        let mut state = CommittedState::default();
        for ops in &recovered.transactions {
            state.apply_transaction(ops);
        }

        if recovered.discarded_bytes > 0 || recovered.incomplete > 0 {
            warn!(
                path = %path.display(),
                discarded_bytes = recovered.discarded_bytes,
                incomplete = recovered.incomplete,
                "wal recovery discarded uncommitted tail"
            );
        }
        info!(
            path = %path.display(),
            transactions = recovered.transactions.len(),
            accounts = state.balances.len(),
            "ledger store opened"
        );

        Ok(Self::with_parts(state, Some(wal), config))
    }

    /// Opens the store described by `config`: WAL-backed if it names a path,
    /// in memory otherwise.
    ///
    /// # Errors
    ///
    /// As [`LedgerStore::open`].
    pub fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        match &config.path {
            Some(path) => Self::open(path, config.clone()),
            None => Ok(Self::in_memory(config.clone())),
        }
    }

    /// Starts a transaction. Nothing is locked until the first statement.
    #[must_use]
    pub fn begin_transaction(&self) -> StoreTransaction {
        StoreTransaction {
            store: self.clone(),
            id: self.inner.next_txn.fetch_add(1, Ordering::Relaxed),
            guards: HashMap::new(),
            balances: BTreeMap::new(),
            items: BTreeMap::new(),
            log: Vec::new(),
            balance_deltas: BTreeMap::new(),
            item_deltas: BTreeMap::new(),
            counters: Vec::new(),
            status: Status::Active,
        }
    }

    /// Committed balance of an entity. Unknown entities read as 0.
    #[must_use]
    pub fn read_balance(&self, entity: EntityId) -> u64 {
        self.inner.state.read().balance(entity)
    }

    /// Committed quantity of one item stack. Absent stacks read as 0.
    #[must_use]
    pub fn read_item_quantity(&self, entity: EntityId, item: &ItemKey) -> u64 {
        self.inner.state.read().quantity(entity, item)
    }

    /// Committed non-empty item stacks of an entity.
    #[must_use]
    pub fn read_items(&self, entity: EntityId) -> BTreeMap<ItemKey, u64> {
        self.inner.state.read().items.get(&entity).cloned().unwrap_or_default()
    }

    /// Balance, stacks and version of an entity, read atomically.
    #[must_use]
    pub fn read_snapshot(&self, entity: EntityId) -> EntitySnapshot {
        let state = self.inner.state.read();
        EntitySnapshot {
            balance: state.balance(entity),
            items: state.items.get(&entity).cloned().unwrap_or_default(),
            version: state.version(entity),
        }
    }

    /// Number of commits that have touched an entity.
    #[must_use]
    pub fn entity_version(&self, entity: EntityId) -> u64 {
        self.inner.state.read().version(entity)
    }

    /// Audit rows of one entity, oldest first.
    #[must_use]
    pub fn log_entries(&self, entity: EntityId) -> Vec<LogEntry> {
        self.inner
            .state
            .read()
            .log
            .iter()
            .filter(|entry| entry.entity == entity)
            .cloned()
            .collect()
    }

    /// Returns store statistics.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let wal_bytes = self.inner.wal.lock().as_ref().map(WalWriter::len);
        let state = self.inner.state.read();
        StoreStats {
            commits: self.inner.commits.load(Ordering::Relaxed),
            rollbacks: self.inner.rollbacks.load(Ordering::Relaxed),
            accounts: state.balances.len(),
            log_entries: state.log.len(),
            wal_bytes,
        }
    }

    /// Compacts the WAL into a single transaction holding the current state.
    ///
    /// Balances, stacks and every audit row survive. No-op for in-memory stores.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the new log cannot be written; the old
    /// log stays in place and remains valid.
    pub fn checkpoint(&self) -> StoreResult<()> {
        let mut wal = self.inner.wal.lock();
        let Some(writer) = wal.as_mut() else {
            return Ok(());
        };
        self.checkpoint_locked(writer)
    }

    fn checkpoint_locked(&self, writer: &mut WalWriter) -> StoreResult<()> {
        let image = self.inner.state.read().image();
        let before = writer.len();
        writer.rewrite(&image)?;
        self.inner.commits_since_checkpoint.store(0, Ordering::Relaxed);
        info!(
            path = %writer.path().display(),
            before_bytes = before,
            after_bytes = writer.len(),
            "wal checkpoint complete"
        );
        Ok(())
    }

    fn row_lock(&self, entity: EntityId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.inner.row_locks.entry(entity).or_default().value())
    }
}

#[derive(Debug)]
enum Status {
    Active,
    Poisoned(StoreError),
    Finished,
}

/// What a commit published.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    /// LSN of the COMMIT record (`None` for in-memory stores or empty transactions).
    pub lsn: Option<u64>,
    /// Entities whose rows or log changed, with their new version.
    pub versions: Vec<(EntityId, u64)>,
    /// Net balance change per entity.
    pub balance_deltas: Vec<(EntityId, i64)>,
    /// Net quantity change per item stack.
    pub item_deltas: Vec<(EntityId, ItemKey, i64)>,
    /// Counters staged by the transaction body.
    pub counters: Vec<Counter>,
}

impl CommitReceipt {
    /// Entities the transaction touched.
    #[must_use]
    pub fn entities(&self) -> Vec<EntityId> {
        self.versions.iter().map(|(entity, _)| *entity).collect()
    }

    /// Telemetry for this commit: `balance` and `item:<key>` counters for
    /// every non-zero net change, then the counters the body staged.
    #[must_use]
    pub fn into_counters(self) -> Vec<Counter> {
        let mut counters = Vec::with_capacity(self.balance_deltas.len() + self.item_deltas.len() + self.counters.len());
        counters.extend(
            self.balance_deltas
                .into_iter()
                .filter(|(_, delta)| *delta != 0)
                .map(|(entity, delta)| Counter { entity, key: "balance".to_string(), delta }),
        );
        counters.extend(
            self.item_deltas
                .into_iter()
                .filter(|(_, _, delta)| *delta != 0)
                .map(|(entity, item, delta)| Counter { entity, key: format!("item:{item}"), delta }),
        );
        counters.extend(self.counters);
        counters
    }
}

/// A transaction on the ledger.
///
/// Dropping an unfinished transaction rolls it back.
#[must_use = "a transaction does nothing unless committed"]
pub struct StoreTransaction {
    store: LedgerStore,
    id: u64,
    guards: HashMap<EntityId, OwnedMutexGuard<()>>,
    balances: BTreeMap<EntityId, u64>,
    items: BTreeMap<(EntityId, ItemKey), u64>,
    log: Vec<LogEntry>,
    balance_deltas: BTreeMap<EntityId, i64>,
    item_deltas: BTreeMap<(EntityId, ItemKey), i64>,
    counters: Vec<Counter>,
    status: Status,
}

impl std::fmt::Debug for StoreTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreTransaction")
            .field("id", &self.id)
            .field("locked", &self.guards.len())
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl StoreTransaction {
    /// Transaction id, for logs.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Adjusts a balance by `delta` and returns the staged result.
    ///
    /// Acquires the entity's row lock on first touch.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InsufficientFunds` if the result would be
    /// negative. Any error poisons the transaction.
    pub async fn adjust_balance(&mut self, entity: EntityId, delta: i64) -> StoreResult<u64> {
        self.ensure_active()?;
        self.lock_row(entity).await;

        let current = self.staged_balance(entity);
        let Some(next) = current.checked_add_signed(delta) else {
            let err = if delta < 0 {
                StoreError::InsufficientFunds { entity, available: current, delta }
            } else {
                StoreError::Overflow(entity)
            };
            return Err(self.poison(err));
        };

        self.balances.insert(entity, next);
        let net = self.balance_deltas.entry(entity).or_insert(0);
        *net = net.saturating_add(delta);
        Ok(next)
    }

    /// Adjusts an item stack by `delta` and returns the staged quantity.
    ///
    /// Acquires the entity's row lock on first touch. A stack that reaches
    /// zero is removed at commit.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InsufficientItems` if the result would be
    /// negative. Any error poisons the transaction.
    pub async fn adjust_item_quantity(&mut self, entity: EntityId, item: &ItemKey, delta: i64) -> StoreResult<u64> {
        self.ensure_active()?;
        self.lock_row(entity).await;

        let current = self.staged_quantity(entity, item);
        let Some(next) = current.checked_add_signed(delta) else {
            let err = if delta < 0 {
                StoreError::InsufficientItems {
                    entity,
                    item: item.clone(),
                    required: delta.unsigned_abs(),
                    available: current,
                }
            } else {
                StoreError::Overflow(entity)
            };
            return Err(self.poison(err));
        };

        let key = (entity, item.clone());
        self.items.insert(key.clone(), next);
        let net = self.item_deltas.entry(key).or_insert(0);
        *net = net.saturating_add(delta);
        Ok(next)
    }

    /// Reads a balance as this transaction sees it, locking the row.
    ///
    /// # Errors
    ///
    /// Fails only if the transaction is no longer active.
    pub async fn balance(&mut self, entity: EntityId) -> StoreResult<u64> {
        self.ensure_active()?;
        self.lock_row(entity).await;
        Ok(self.staged_balance(entity))
    }

    /// Reads an item quantity as this transaction sees it, locking the row.
    ///
    /// # Errors
    ///
    /// Fails only if the transaction is no longer active.
    pub async fn item_quantity(&mut self, entity: EntityId, item: &ItemKey) -> StoreResult<u64> {
        self.ensure_active()?;
        self.lock_row(entity).await;
        Ok(self.staged_quantity(entity, item))
    }

    /// Stages an audit row.
    ///
    /// # Errors
    ///
    /// Fails only if the transaction is no longer active.
    pub fn append_log_entry(&mut self, entry: LogEntry) -> StoreResult<()> {
        self.ensure_active()?;
        self.log.push(entry);
        Ok(())
    }

    /// Stages a telemetry counter, emitted only if the transaction commits.
    pub fn stage_counter(&mut self, entity: EntityId, key: impl Into<String>, delta: i64) {
        self.counters.push(Counter { entity, key: key.into(), delta });
    }

    /// Commits all staged changes.
    ///
    /// The WAL append and the publication to the committed tables happen in
    /// one synchronous section; row locks are released afterwards.
    ///
    /// # Errors
    ///
    /// Returns the poisoning error if a statement failed, or `StoreError::Io`
    /// if the WAL append failed. Nothing is published in either case.
    pub fn commit(mut self) -> StoreResult<CommitReceipt> {
        if let Status::Poisoned(err) = std::mem::replace(&mut self.status, Status::Finished) {
            self.store.inner.rollbacks.fetch_add(1, Ordering::Relaxed);
            debug!(txn = self.id, error = %err, "poisoned transaction rolled back at commit");
            return Err(err);
        }

        let ops = self.post_images();
        let mut receipt = CommitReceipt {
            lsn: None,
            versions: Vec::new(),
            balance_deltas: self.balance_deltas.iter().map(|(e, d)| (*e, *d)).collect(),
            item_deltas: self
                .item_deltas
                .iter()
                .map(|((e, item), d)| (*e, item.clone(), *d))
                .collect(),
            counters: std::mem::take(&mut self.counters),
        };
        if ops.is_empty() {
            return Ok(receipt);
        }

        let inner = &self.store.inner;
        let mut wal = inner.wal.lock();
        if let Some(writer) = wal.as_mut() {
            match writer.append_transaction(&ops) {
                Ok(lsn) => receipt.lsn = Some(lsn),
                Err(err) => {
                    inner.rollbacks.fetch_add(1, Ordering::Relaxed);
                    warn!(txn = self.id, error = %err, "wal append failed; transaction rolled back");
                    return Err(err);
                }
            }
        }
        receipt.versions = inner.state.write().apply_transaction(&ops);
        inner.commits.fetch_add(1, Ordering::Relaxed);

        let since = inner.commits_since_checkpoint.fetch_add(1, Ordering::Relaxed) + 1;
        if inner.config.checkpoint_every > 0 && since >= inner.config.checkpoint_every {
            if let Some(writer) = wal.as_mut() {
                // The commit is already durable; a failed compaction only delays the next one.
                if let Err(err) = self.store.checkpoint_locked(writer) {
                    warn!(error = %err, "automatic wal checkpoint failed");
                }
            }
        }
        drop(wal);

        debug!(txn = self.id, lsn = ?receipt.lsn, entities = receipt.versions.len(), "transaction committed");
        Ok(receipt)
    }

    /// Discards all staged changes and releases the row locks.
    pub fn rollback(mut self) {
        self.status = Status::Finished;
        self.store.inner.rollbacks.fetch_add(1, Ordering::Relaxed);
        debug!(txn = self.id, "transaction rolled back");
    }

    fn ensure_active(&self) -> StoreResult<()> {
        match &self.status {
            Status::Active => Ok(()),
            Status::Poisoned(err) => Err(err.clone()),
            Status::Finished => Err(StoreError::Aborted(format!("transaction {} already finished", self.id))),
        }
    }

    fn poison(&mut self, err: StoreError) -> StoreError {
        debug!(txn = self.id, error = %err, "statement failed; transaction poisoned");
        self.status = Status::Poisoned(err.clone());
        err
    }

    async fn lock_row(&mut self, entity: EntityId) {
        if self.guards.contains_key(&entity) {
            return;
        }
        let lock = self.store.row_lock(entity);
        let guard = lock.lock_owned().await;
        self.guards.insert(entity, guard);
    }

    fn staged_balance(&self, entity: EntityId) -> u64 {
        match self.balances.get(&entity) {
            Some(balance) => *balance,
            None => self.store.read_balance(entity),
        }
    }

    fn staged_quantity(&self, entity: EntityId, item: &ItemKey) -> u64 {
        match self.items.get(&(entity, item.clone())) {
            Some(quantity) => *quantity,
            None => self.store.read_item_quantity(entity, item),
        }
    }

    fn post_images(&self) -> Vec<WalOp> {
        let mut ops = Vec::with_capacity(self.balances.len() + self.items.len() + self.log.len());
        ops.extend(
            self.balances
                .iter()
                .map(|(entity, balance)| WalOp::SetBalance { entity: *entity, balance: *balance }),
        );
        ops.extend(self.items.iter().map(|((entity, item), quantity)| WalOp::SetItem {
            entity: *entity,
            item: item.clone(),
            quantity: *quantity,
        }));
        ops.extend(self.log.iter().cloned().map(WalOp::AppendLog));
        ops
    }
}

impl Drop for StoreTransaction {
    fn drop(&mut self) {
        // If not finalized, auto-rollback
        if !matches!(self.status, Status::Finished) {
            self.store.inner.rollbacks.fetch_add(1, Ordering::Relaxed);
            debug!(txn = self.id, "transaction dropped before commit; rolled back");
        }
    }
}
