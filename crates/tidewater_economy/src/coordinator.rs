//! # Transaction Coordinator
//!
//! Runs a caller-supplied body inside one ledger transaction under a hard
//! deadline and maps every way it can end onto one taxonomy:
//!
//! | Body / commit result              | Caller sees                     | Ledger      |
//! |-----------------------------------|---------------------------------|-------------|
//! | `Ok(value)`, commit ok            | `Ok(Committed { value, .. })`   | changed     |
//! | insufficient funds / items        | `BusinessRuleViolation`         | unchanged   |
//! | deadline elapsed                  | `SystemBusy` (retryable)        | unchanged   |
//! | WAL failure                       | `Storage`                       | unchanged   |
//!
//! After a commit the coordinator invalidates the cache for every touched
//! entity and hands telemetry counters to the sink. It never retries.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::cache::EntityCache;
use crate::config::CoordinatorConfig;
use crate::error::{StoreResult, TransactionError, TransactionResult};
use crate::ledger::EntityId;
use crate::store::{CommitReceipt, LedgerStore, StoreTransaction};
use crate::telemetry::TelemetrySink;

/// Future returned by a transaction body.
pub type TxnFuture<'t, T> = BoxFuture<'t, StoreResult<T>>;

/// A committed transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Committed<T> {
    /// Value returned by the body.
    pub value: T,
    /// Entities whose state changed.
    pub entities: Vec<EntityId>,
    /// LSN of the COMMIT record, if the store is durable.
    pub lsn: Option<u64>,
}

/// Runs atomic multi-step ledger transactions.
#[derive(Clone)]
pub struct TransactionCoordinator {
    store: LedgerStore,
    cache: EntityCache,
    telemetry: Arc<dyn TelemetrySink>,
    config: CoordinatorConfig,
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TransactionCoordinator {
    /// Creates a coordinator.
    #[must_use]
    pub fn new(
        store: LedgerStore,
        cache: EntityCache,
        telemetry: Arc<dyn TelemetrySink>,
        config: CoordinatorConfig,
    ) -> Self {
        Self { store, cache, telemetry, config }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    /// The cache this coordinator invalidates.
    #[must_use]
    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    /// Runs `body` in a transaction with the configured default deadline.
    ///
    /// # Errors
    ///
    /// As [`TransactionCoordinator::run_transaction`].
    pub async fn run_default<T, F>(&self, entity: EntityId, body: F) -> TransactionResult<Committed<T>>
    where
        F: for<'t> FnOnce(&'t mut StoreTransaction) -> TxnFuture<'t, T>,
    {
        self.run_transaction(entity, self.config.default_timeout(), body).await
    }

    /// Runs `body` in a transaction and commits it if the body succeeds.
    ///
    /// `entity` is the primary entity, used for logging; the body may touch
    /// any number of entities.
    ///
    /// ```rust,ignore
    /// coordinator
    ///     .run_transaction(buyer, Duration::from_secs(10), |txn| {
    ///         Box::pin(async move {
    ///             txn.adjust_balance(buyer, -price).await?;
    ///             txn.adjust_item_quantity(buyer, &item, 1).await
    ///         })
    ///     })
    ///     .await?;
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `TransactionError::BusinessRuleViolation` if a business rule
    /// failed, `TransactionError::SystemBusy` if `timeout` elapsed, and
    /// `TransactionError::Storage` if the store could not persist the commit.
    /// The ledger is unchanged in every error case.
    pub async fn run_transaction<T, F>(&self, entity: EntityId, timeout: Duration, body: F) -> TransactionResult<Committed<T>>
    where
        F: for<'t> FnOnce(&'t mut StoreTransaction) -> TxnFuture<'t, T>,
    {
        let mut txn = self.store.begin_transaction();
        let txn_id = txn.id();

        let outcome = tokio::time::timeout(timeout, body(&mut txn)).await;
        let value = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                txn.rollback();
                let err = TransactionError::from(err);
                debug!(txn = txn_id, %entity, error = %err, "transaction rolled back");
                return Err(err);
            }
            Err(_) => {
                txn.rollback();
                warn!(txn = txn_id, %entity, ?timeout, "transaction deadline exceeded; rolled back");
                return Err(TransactionError::SystemBusy { timeout });
            }
        };

        let receipt = txn.commit().map_err(TransactionError::from)?;
        let entities = receipt.entities();
        for touched in &entities {
            self.cache.invalidate(*touched).await;
        }
        self.emit_telemetry(receipt.clone());

        info!(txn = txn_id, %entity, lsn = ?receipt.lsn, touched = entities.len(), "transaction committed");
        Ok(Committed { value, entities, lsn: receipt.lsn })
    }

    fn emit_telemetry(&self, receipt: CommitReceipt) {
        for counter in receipt.into_counters() {
            self.telemetry.emit(counter);
        }
    }
}
