//! # Interactive Event Engine
//!
//! **Exactly-once resolution of timed choice prompts.**
//!
//! An event instance stakes some of the acting entity's items, offers a set
//! of choices, and resolves exactly once: by the player's selection or by the
//! decision window elapsing, whichever claims it first.
//!
//! [`EventEngine::roll_trigger`] decides at the sell decision point whether
//! a catalogue event interrupts the sale at all.
//!
//! ## Lifecycle
//!
//! ```text
//!            choose(id, entity, choice)             commit ok / stale / busy / rule
//!   Open ───────────────────────────────> Resolving ─────────────────────────────> Completed
//!     │                                      ▲
//!     └──────────── window elapsed ──────────┘
//!                 (maximin safe default)
//! ```
//!
//! The `Open -> Resolving` transition happens synchronously under the
//! instance lock, before anything is awaited, so a second callback is
//! rejected immediately. `Completed` is immutable.
//!
//! ## Resolution
//!
//! 1. Sample the chosen choice's outcomes by cumulative weight
//! 2. `final = floor(base * mul) + flat` (clamped to >= 0 on timeout)
//! 3. One coordinator transaction: consume staked items (if the resolved
//!    flag says so), adjust the balance, append the tagged audit row,
//!    stage counters
//! 4. Only after commit: apply side effects, best-effort

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::catalogue::{Catalogue, ChoiceDefinition, EventDefinition, SideEffect};
use crate::config::EngineConfig;
use crate::coordinator::TransactionCoordinator;
use crate::error::{EventError, EventResult, RuleViolation, SideEffectError, StoreError, TransactionError};
use crate::ledger::{EntityId, ItemKey, LogEntry};
use crate::catalogue::TriggerContext;
use crate::resolution::{roll_chance, sample_outcome, select_safe_default};

/// Identifier of an event instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub u64);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Items put at stake by an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StakedItem {
    /// Item key.
    pub item: ItemKey,
    /// Quantity consumed if the event consumes its stake.
    pub quantity: u64,
}

/// Request to open an event instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenRequest {
    /// Catalogue key of the definition.
    pub definition: String,
    /// Entity the event belongs to.
    pub entity: EntityId,
    /// Items at stake.
    pub stake: Vec<StakedItem>,
    /// Base economic value. `None` prices the stake through the catalogue.
    pub base_value: Option<u64>,
}

/// One choice as shown to the player.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptChoice {
    /// Id to send back with `choose`.
    pub id: String,
    /// Button text.
    pub label: String,
}

/// What the presentation layer renders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prompt {
    /// Instance id.
    pub event: EventId,
    /// Definition key.
    pub definition: String,
    /// Acting entity.
    pub entity: EntityId,
    /// Base value of the stake.
    pub base_value: u64,
    /// Choices in declaration order.
    pub choices: Vec<PromptChoice>,
    /// Decision window.
    pub window: Duration,
}

/// How an instance was decided.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// The acting entity selected a choice.
    Chosen,
    /// The decision window elapsed.
    TimedOut,
}

/// How the resolving transaction ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// The ledger changed.
    Committed {
        /// Signed balance adjustment applied.
        value: i64,
        /// Whether the staked items were consumed.
        consumed_items: bool,
        /// Outcome text, if the outcome has one.
        message: Option<String>,
        /// LSN of the commit, if durable.
        lsn: Option<u64>,
    },
    /// The staked items were no longer there at commit time.
    StaleState(RuleViolation),
    /// Another business rule failed (e.g. a loss larger than the balance).
    RuleViolation(RuleViolation),
    /// The transaction deadline elapsed.
    Busy {
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// The store could not persist the commit.
    StorageFailure(String),
}

impl ResolutionOutcome {
    /// Returns true if the ledger changed.
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

/// Result of applying one side effect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SideEffectReport {
    /// Applied.
    Applied(SideEffect),
    /// Failed; the commit stands.
    Failed {
        /// The effect.
        effect: SideEffect,
        /// Why it failed.
        error: String,
    },
}

/// Final record of an instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    /// Instance id.
    pub event: EventId,
    /// Definition key.
    pub definition: String,
    /// Acting entity.
    pub entity: EntityId,
    /// How it was decided.
    pub decision: Decision,
    /// Choice that was resolved (`None` if the fallback outcome was used on timeout).
    pub choice: Option<String>,
    /// How the transaction ended.
    pub outcome: ResolutionOutcome,
    /// Side effects attempted after commit.
    pub side_effects: Vec<SideEffectReport>,
    /// When the instance completed.
    pub resolved_at: DateTime<Utc>,
}

/// State of an instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventState {
    /// Waiting for a decision.
    Open,
    /// Decided; the transaction is running.
    Resolving(Decision),
    /// Done. Immutable.
    Completed(Arc<Resolution>),
}

/// Presentation boundary.
pub trait Presenter: Send + Sync {
    /// Shows a prompt. Selections come back through [`EventEngine::choose`].
    fn present(&self, prompt: &Prompt);

    /// Shows the final result.
    fn resolved(&self, _resolution: &Resolution) {}
}

/// Headless presenter.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn present(&self, _prompt: &Prompt) {}
}

/// Applies effects owned by other subsystems (tool durability, buffs).
#[async_trait]
pub trait SideEffectSink: Send + Sync {
    /// Applies one effect for `entity`.
    async fn apply(&self, entity: EntityId, effect: &SideEffect) -> Result<(), SideEffectError>;
}

/// Accepts every effect and does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSideEffects;

#[async_trait]
impl SideEffectSink for NullSideEffects {
    async fn apply(&self, _entity: EntityId, _effect: &SideEffect) -> Result<(), SideEffectError> {
        Ok(())
    }
}

struct Slot {
    state: EventState,
    completed_at: Option<Instant>,
}

struct Instance {
    id: EventId,
    definition: Arc<EventDefinition>,
    entity: EntityId,
    stake: Vec<StakedItem>,
    base_value: u64,
    slot: Mutex<Slot>,
    done: watch::Sender<Option<Arc<Resolution>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Instance {
    /// The single `Open -> Resolving` transition.
    fn begin_resolving(&self, decision: Decision) -> EventResult<()> {
        let mut slot = self.slot.lock();
        match slot.state {
            EventState::Open => {
                slot.state = EventState::Resolving(decision);
                Ok(())
            }
            EventState::Resolving(_) => Err(EventError::AlreadyDecided(self.id.0)),
            EventState::Completed(_) => Err(EventError::Completed(self.id.0)),
        }
    }

    fn complete(&self, resolution: Arc<Resolution>) {
        {
            let mut slot = self.slot.lock();
            slot.state = EventState::Completed(Arc::clone(&resolution));
            slot.completed_at = Some(Instant::now());
        }
        self.done.send_replace(Some(resolution));
    }

    fn cancel_timer(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }

    fn is_purgeable(&self, now: Instant, retention: Duration) -> bool {
        self.slot
            .lock()
            .completed_at
            .is_some_and(|at| now.saturating_duration_since(at) >= retention)
    }
}

#[derive(Clone, Copy, Debug)]
enum Plan {
    Choice(usize),
    Timeout,
}

struct Shared {
    coordinator: TransactionCoordinator,
    catalogue: Arc<dyn Catalogue>,
    presenter: Arc<dyn Presenter>,
    side_effects: Arc<dyn SideEffectSink>,
    config: EngineConfig,
    rng: Mutex<ChaCha8Rng>,
    instances: DashMap<EventId, Arc<Instance>>,
    next_id: AtomicU64,
}

/// Runs interactive event instances. Cheap to clone.
#[derive(Clone)]
pub struct EventEngine {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for EventEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEngine")
            .field("instances", &self.shared.instances.len())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl EventEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(
        coordinator: TransactionCoordinator,
        catalogue: Arc<dyn Catalogue>,
        presenter: Arc<dyn Presenter>,
        side_effects: Arc<dyn SideEffectSink>,
        config: EngineConfig,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            shared: Arc::new(Shared {
                coordinator,
                catalogue,
                presenter,
                side_effects,
                config,
                rng: Mutex::new(rng),
                instances: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Opens an instance, hands its prompt to the presenter and starts the
    /// decision window.
    ///
    /// The stake must be held by the entity at the moment of opening.
    /// Completed instances past their retention period are purged first.
    ///
    /// # Errors
    ///
    /// Returns `EventError::UnknownDefinition` / `EventError::InvalidDefinition`
    /// for catalogue problems, `EventError::InsufficientStake` if the entity
    /// does not hold the staked items and `EventError::UnknownItem` if the
    /// stake must be priced and an item has no metadata.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn open(&self, request: OpenRequest) -> EventResult<Prompt> {
        self.purge_completed();

        let definition = self
            .shared
            .catalogue
            .resolve_event_definition(&request.definition)
            .ok_or_else(|| EventError::UnknownDefinition(request.definition.clone()))?;
        definition.validate()?;
        self.check_stake(request.entity, &request.stake)?;

        let base_value = match request.base_value {
            Some(value) => value,
            None => self.base_value_of(&request.stake)?,
        };

        let id = EventId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let window = definition.timeout();
        let prompt = Prompt {
            event: id,
            definition: definition.key.clone(),
            entity: request.entity,
            base_value,
            choices: definition
                .choices
                .iter()
                .map(|choice| PromptChoice { id: choice.id.clone(), label: choice.label.clone() })
                .collect(),
            window,
        };

        let (done, _) = watch::channel(None);
        let instance = Arc::new(Instance {
            id,
            definition,
            entity: request.entity,
            stake: request.stake,
            base_value,
            slot: Mutex::new(Slot { state: EventState::Open, completed_at: None }),
            done,
            timer: Mutex::new(None),
        });
        self.shared.instances.insert(id, Arc::clone(&instance));
        self.shared.presenter.present(&prompt);

        let engine = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            engine.window_elapsed(id).await;
        });
        *instance.timer.lock() = Some(timer);

        info!(event = %id, definition = %prompt.definition, entity = %prompt.entity, base_value, "interactive event opened");
        Ok(prompt)
    }

    /// Rolls the catalogue's trigger candidates for a sale of `stake`.
    ///
    /// Candidates are visited in declaration order. A candidate whose
    /// condition fails is skipped without a roll; the first whose chance
    /// roll hits wins. Returns the request to pass to [`EventEngine::open`].
    #[must_use]
    pub fn roll_trigger(&self, entity: EntityId, stake: &[StakedItem], base_value: u64) -> Option<OpenRequest> {
        let candidates = self.shared.catalogue.trigger_candidates();
        if candidates.is_empty() {
            return None;
        }
        let context = self.trigger_context(entity, stake, base_value);

        for definition in candidates {
            let Some(chance) = definition.chance else {
                continue;
            };
            if let Some(condition) = &definition.condition {
                if !condition.holds(&context) {
                    debug!(definition = %definition.key, %entity, ?condition, "trigger condition not met");
                    continue;
                }
            }
            let hit = roll_chance(chance, &mut *self.shared.rng.lock());
            if hit {
                info!(definition = %definition.key, %entity, %chance, base_value, "interactive event triggered");
                return Some(OpenRequest {
                    definition: definition.key.clone(),
                    entity,
                    stake: stake.to_vec(),
                    base_value: Some(base_value),
                });
            }
        }
        None
    }

    /// Resolves an instance with the acting entity's selection.
    ///
    /// # Errors
    ///
    /// Rejected without changing anything if the instance is unknown
    /// (`UnknownEvent`), decided (`AlreadyDecided`), completed (`Completed`),
    /// if `entity` is not the acting entity (`NotActingEntity`) or if the
    /// choice does not exist (`UnknownChoice`).
    pub async fn choose(&self, event: EventId, entity: EntityId, choice: &str) -> EventResult<Arc<Resolution>> {
        let instance = self.instance(event)?;
        if instance.entity != entity {
            return Err(EventError::NotActingEntity { event: event.0, entity });
        }
        let Some(index) = instance.definition.choice_index(choice) else {
            return Err(EventError::UnknownChoice { event: event.0, choice: choice.to_string() });
        };

        if let Err(err) = instance.begin_resolving(Decision::Chosen) {
            debug!(%event, %entity, error = %err, "late callback rejected");
            return Err(err);
        }
        instance.cancel_timer();
        self.settle(instance, Plan::Choice(index)).await
    }

    /// Resolves an instance as if its decision window elapsed.
    ///
    /// # Errors
    ///
    /// `UnknownEvent`, `AlreadyDecided` or `Completed`, without changing anything.
    pub async fn expire(&self, event: EventId) -> EventResult<Arc<Resolution>> {
        let instance = self.instance(event)?;
        instance.begin_resolving(Decision::TimedOut)?;
        instance.cancel_timer();
        self.settle(instance, Plan::Timeout).await
    }

    /// Waits for an instance to complete.
    ///
    /// # Errors
    ///
    /// Returns `EventError::UnknownEvent` if there is no such instance.
    pub async fn wait(&self, event: EventId) -> EventResult<Arc<Resolution>> {
        let instance = self.instance(event)?;
        let mut rx = instance.done.subscribe();
        let resolution = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| EventError::ResolutionAborted(event.0))?
            .clone();
        resolution.ok_or(EventError::ResolutionAborted(event.0))
    }

    /// Current state of an instance, if it is still retained.
    #[must_use]
    pub fn state(&self, event: EventId) -> Option<EventState> {
        let instance = self.shared.instances.get(&event).map(|entry| Arc::clone(entry.value()))?;
        let state = instance.slot.lock().state.clone();
        Some(state)
    }

    /// Sums `base_value * quantity` over a stake.
    ///
    /// # Errors
    ///
    /// Returns `EventError::UnknownItem` if an item has no metadata.
    pub fn base_value_of(&self, stake: &[StakedItem]) -> EventResult<u64> {
        stake.iter().try_fold(0u64, |total, staked| {
            let metadata = self
                .shared
                .catalogue
                .resolve_item_metadata(&staked.item)
                .ok_or_else(|| EventError::UnknownItem(staked.item.clone()))?;
            Ok(total.saturating_add(metadata.base_value.saturating_mul(staked.quantity)))
        })
    }

    /// Drops completed instances older than the retention period.
    ///
    /// Returns how many were dropped.
    pub fn purge_completed(&self) -> usize {
        let retention = self.shared.config.completed_retention();
        let now = Instant::now();
        let before = self.shared.instances.len();
        self.shared
            .instances
            .retain(|_, instance| !instance.is_purgeable(now, retention));
        before.saturating_sub(self.shared.instances.len())
    }

    /// Number of retained instances (any state).
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.shared.instances.len()
    }

    /// Fails if `entity` holds less of any item than the stake names.
    fn check_stake(&self, entity: EntityId, stake: &[StakedItem]) -> EventResult<()> {
        let mut required: BTreeMap<&ItemKey, u64> = BTreeMap::new();
        for staked in stake {
            let total = required.entry(&staked.item).or_insert(0);
            *total = total.saturating_add(staked.quantity);
        }
        let store = self.shared.coordinator.store();
        for (item, required) in required {
            let available = store.read_item_quantity(entity, item);
            if available < required {
                debug!(%entity, %item, required, available, "stake not held");
                return Err(EventError::InsufficientStake { entity, item: item.clone(), required, available });
            }
        }
        Ok(())
    }

    fn trigger_context(&self, entity: EntityId, stake: &[StakedItem], base_value: u64) -> TriggerContext {
        let items: BTreeSet<&ItemKey> = stake.iter().map(|staked| &staked.item).collect();
        let metadata: Vec<_> = items
            .iter()
            .filter_map(|item| self.shared.catalogue.resolve_item_metadata(item))
            .collect();
        TriggerContext {
            base_value,
            item_count: items.len(),
            balance: self.shared.coordinator.store().read_balance(entity),
            max_item_value: metadata.iter().map(|meta| meta.base_value).max().unwrap_or(0),
            has_legendary: metadata.iter().any(|meta| meta.rarity == "legendary"),
        }
    }

    fn instance(&self, event: EventId) -> EventResult<Arc<Instance>> {
        self.shared
            .instances
            .get(&event)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(EventError::UnknownEvent(event.0))
    }

    async fn window_elapsed(&self, event: EventId) {
        match self.expire(event).await {
            Ok(_) | Err(EventError::AlreadyDecided(_) | EventError::Completed(_) | EventError::UnknownEvent(_)) => {}
            Err(err) => warn!(%event, error = %err, "timeout resolution failed"),
        }
    }

    /// Runs the resolution on its own task, so a caller that stops waiting
    /// cannot leave the instance stuck in `Resolving`.
    ///
    /// Every settlement also purges instances past their retention.
    async fn settle(&self, instance: Arc<Instance>, plan: Plan) -> EventResult<Arc<Resolution>> {
        let id = instance.id;
        let engine = self.clone();
        let resolution = tokio::spawn(engine.resolve(instance, plan))
            .await
            .map_err(|_| EventError::ResolutionAborted(id.0));
        let purged = self.purge_completed();
        if purged > 0 {
            debug!(purged, "completed event instances purged");
        }
        resolution
    }

    async fn resolve(self, instance: Arc<Instance>, plan: Plan) -> Arc<Resolution> {
        let definition = Arc::clone(&instance.definition);
        let timed_out = matches!(plan, Plan::Timeout);
        let base_value = instance.base_value;
        let entity = instance.entity;

        let choice_index = match plan {
            Plan::Choice(index) => Some(index),
            Plan::Timeout => select_safe_default(&definition, base_value),
        };
        let choice = choice_index.and_then(|index| definition.choices.get(index));
        let sampled = choice.and_then(|choice| {
            let mut rng = self.shared.rng.lock();
            sample_outcome(&choice.outcomes, &mut *rng)
        });
        let fallback;
        let outcome = match (choice, sampled) {
            (Some(choice), Some(index)) => &choice.outcomes[index],
            _ => {
                fallback = definition.fallback_outcome();
                &fallback
            }
        };

        let mut value = outcome.final_value(base_value);
        if timed_out {
            // Non-response never costs currency.
            value = value.max(0);
        }
        let consume = outcome
            .consume_items
            .or_else(|| choice.and_then(|choice| choice.consume_items))
            .unwrap_or(definition.consume_items);
        let reason = if timed_out {
            format!("interactive_timeout_{}", definition.key)
        } else {
            format!("interactive_{}", definition.key)
        };
        let counters = resolution_counters(&definition, choice, value, base_value, timed_out);
        let stake = if consume { instance.stake.clone() } else { Vec::new() };
        let category = definition.category.clone();

        let result = self
            .shared
            .coordinator
            .run_transaction(entity, self.shared.config.resolution_timeout(), move |txn| {
                Box::pin(async move {
                    for staked in &stake {
                        let quantity = i64::try_from(staked.quantity).map_err(|_| StoreError::Overflow(entity))?;
                        txn.adjust_item_quantity(entity, &staked.item, -quantity).await?;
                    }
                    if value != 0 {
                        txn.adjust_balance(entity, value).await?;
                    }
                    txn.append_log_entry(LogEntry::new(entity, value, reason, category))?;
                    for (key, delta) in counters {
                        txn.stage_counter(entity, key, delta);
                    }
                    Ok(())
                })
            })
            .await;

        let outcome_record = match result {
            Ok(committed) => ResolutionOutcome::Committed {
                value,
                consumed_items: consume,
                message: outcome.message.clone(),
                lsn: committed.lsn,
            },
            Err(TransactionError::BusinessRuleViolation(violation @ RuleViolation::InsufficientItems { .. })) => {
                ResolutionOutcome::StaleState(violation)
            }
            Err(TransactionError::BusinessRuleViolation(violation)) => ResolutionOutcome::RuleViolation(violation),
            Err(TransactionError::SystemBusy { timeout }) => ResolutionOutcome::Busy { timeout },
            Err(TransactionError::Storage(err)) => ResolutionOutcome::StorageFailure(err.to_string()),
        };

        let side_effects = if outcome_record.is_committed() {
            self.apply_side_effects(entity, &outcome.effects).await
        } else {
            Vec::new()
        };

        let resolution = Arc::new(Resolution {
            event: instance.id,
            definition: definition.key.clone(),
            entity,
            decision: if timed_out { Decision::TimedOut } else { Decision::Chosen },
            choice: choice.map(|choice| choice.id.clone()),
            outcome: outcome_record,
            side_effects,
            resolved_at: Utc::now(),
        });

        if resolution.outcome.is_committed() {
            info!(event = %instance.id, %entity, choice = ?resolution.choice, value, timed_out, "interactive event resolved");
        } else {
            warn!(event = %instance.id, %entity, outcome = ?resolution.outcome, "interactive event completed without commit");
        }

        instance.complete(Arc::clone(&resolution));
        self.shared.presenter.resolved(&resolution);
        resolution
    }

    async fn apply_side_effects(&self, entity: EntityId, effects: &[SideEffect]) -> Vec<SideEffectReport> {
        let mut reports = Vec::with_capacity(effects.len());
        for effect in effects {
            match self.shared.side_effects.apply(entity, effect).await {
                Ok(()) => reports.push(SideEffectReport::Applied(effect.clone())),
                Err(err) => {
                    warn!(%entity, ?effect, error = %err, "side effect failed after commit");
                    reports.push(SideEffectReport::Failed { effect: effect.clone(), error: err.to_string() });
                }
            }
        }
        reports
    }
}

/// Counters staged on the resolving transaction.
fn resolution_counters(
    definition: &EventDefinition,
    choice: Option<&ChoiceDefinition>,
    value: i64,
    base_value: u64,
    timed_out: bool,
) -> Vec<(String, i64)> {
    let mut counters = vec![("interactive_events_triggered".to_string(), 1)];
    if let Some(choice) = choice {
        counters.push((format!("{}_{}", definition.key, choice.id), 1));
        if let Some(counter) = &choice.counter {
            counters.push((counter.clone(), 1));
        }
        if choice.risky {
            let won = value > i64::try_from(base_value).unwrap_or(i64::MAX);
            let suffix = if won { "wins" } else { "losses" };
            counters.push((format!("{}_{suffix}", definition.key), 1));
        }
    }
    if value > 0 {
        counters.push(("total_money_earned".to_string(), value));
    }
    if timed_out {
        counters.push((format!("{}_timeout", definition.key), 1));
    }
    counters
}
