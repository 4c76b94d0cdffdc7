//! Integration tests for interactive event resolution against the ledger.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tidewater_economy::{
    Boundaries, ChannelTelemetry, Counter, Decision, Economy, EconomyConfig, EntityId, EventError, EventState,
    ItemKey, LedgerKey, OpenRequest, Prompt, Presenter, Resolution, ResolutionOutcome, SideEffect, SideEffectError,
    SideEffectReport, SideEffectSink, StakedItem, StaticCatalogue,
};

const CATALOGUE: &str = r#"
    [items.salmon]
    display_name = "Salmon"
    base_value = 250

    [[events]]
    key = "haggle"
    category = "fishing"
    timeout_secs = 30

    [[events.choices]]
    id = "push"
    label = "Push for a better price"
    risky = true
    outcomes = [
        { mul = 1.5, weight = 0.5 },
        { mul = 0.8, weight = 0.5 },
    ]

    [[events.choices]]
    id = "accept"
    label = "Take the offer"
    outcomes = [{ mul = 1.0, weight = 1.0 }]

    [[events]]
    key = "appraisal"
    category = "fishing"
    timeout_secs = 10

    [[events.choices]]
    id = "sell"
    label = "Sell to the collector"
    outcomes = [{ mul = 1.5, weight = 1.0, message = "The collector pays a premium.", effects = [{ type = "durability", delta = -3 }] }]

    [[events.choices]]
    id = "keep"
    label = "Keep it"
    consume_items = false
    outcomes = [{ mul = 0.0, weight = 1.0 }]
"#;

const PLAYER: EntityId = EntityId(7);

fn salmon() -> ItemKey {
    ItemKey::new("salmon")
}

fn temp_wal_path() -> std::path::PathBuf {
    let id = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("test_tidewater_{id}.wal"))
}

#[derive(Default)]
struct RecordingPresenter {
    prompts: Mutex<Vec<Prompt>>,
    resolutions: Mutex<Vec<Resolution>>,
}

impl Presenter for RecordingPresenter {
    fn present(&self, prompt: &Prompt) {
        self.prompts.lock().push(prompt.clone());
    }

    fn resolved(&self, resolution: &Resolution) {
        self.resolutions.lock().push(resolution.clone());
    }
}

struct BrokenTools;

#[async_trait]
impl SideEffectSink for BrokenTools {
    async fn apply(&self, _entity: EntityId, _effect: &SideEffect) -> Result<(), SideEffectError> {
        Err(SideEffectError("no tool equipped".into()))
    }
}

fn economy_with(config: &EconomyConfig, boundaries: impl FnOnce(Boundaries) -> Boundaries) -> Economy {
    let catalogue = StaticCatalogue::from_toml_str(CATALOGUE).unwrap();
    let base = Boundaries::new(Arc::new(catalogue));
    Economy::open(config, boundaries(base)).unwrap()
}

fn economy() -> Economy {
    let mut config = EconomyConfig::default();
    config.events.rng_seed = Some(99);
    economy_with(&config, |b| b)
}

fn appraisal(quantity: u64) -> OpenRequest {
    OpenRequest {
        definition: "appraisal".into(),
        entity: PLAYER,
        stake: vec![StakedItem { item: salmon(), quantity }],
        base_value: None,
    }
}

async fn grant(economy: &Economy, key: LedgerKey, amount: i64) {
    economy.cache().apply_delta(PLAYER, key, amount, "grant").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_premium_choice_settles_base_times_multiplier() {
    let economy = economy();
    grant(&economy, LedgerKey::Item(salmon()), 4).await;

    let prompt = economy.events().open(appraisal(4)).unwrap();
    assert_eq!(prompt.base_value, 1000);

    let resolution = economy.events().choose(prompt.event, PLAYER, "sell").await.unwrap();
    match &resolution.outcome {
        ResolutionOutcome::Committed { value, consumed_items, message, .. } => {
            assert_eq!(*value, 1500);
            assert!(*consumed_items);
            assert_eq!(message.as_deref(), Some("The collector pays a premium."));
        }
        other => panic!("expected commit, got {other:?}"),
    }

    assert_eq!(economy.store().read_balance(PLAYER), 1500);
    assert_eq!(economy.store().read_item_quantity(PLAYER, &salmon()), 0);
    let log = economy.store().log_entries(PLAYER);
    let last = log.last().unwrap();
    assert_eq!(last.amount, 1500);
    assert_eq!(last.reason, "interactive_appraisal");
    assert_eq!(last.category, "fishing");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callbacks_resolve_exactly_once() {
    let economy = economy();
    grant(&economy, LedgerKey::Item(salmon()), 4).await;
    let prompt = economy.events().open(appraisal(4)).unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let engine = economy.events().clone();
            let choice = if i % 2 == 0 { "sell" } else { "keep" };
            tokio::spawn(async move { engine.choose(prompt.event, PLAYER, choice).await })
        })
        .collect();

    let mut winners = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => winners += 1,
            Err(EventError::AlreadyDecided(_) | EventError::Completed(_)) => {}
            Err(other) => panic!("unexpected error {other}"),
        }
    }
    assert_eq!(winners, 1);

    let resolution = economy.events().wait(prompt.event).await.unwrap();
    let rows = economy
        .store()
        .log_entries(PLAYER)
        .into_iter()
        .filter(|entry| entry.reason.starts_with("interactive_"))
        .count();
    assert_eq!(rows, 1);
    match resolution.choice.as_deref() {
        Some("sell") => assert_eq!(economy.store().read_balance(PLAYER), 1500),
        Some("keep") => {
            assert_eq!(economy.store().read_balance(PLAYER), 0);
            assert_eq!(economy.store().read_item_quantity(PLAYER, &salmon()), 4);
        }
        other => panic!("unexpected choice {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_timeout_resolves_safe_default_once() {
    let presenter = Arc::new(RecordingPresenter::default());
    let mut config = EconomyConfig::default();
    config.events.rng_seed = Some(3);
    let economy = economy_with(&config, |b| b.with_presenter(presenter.clone()));
    grant(&economy, LedgerKey::Item(salmon()), 4).await;

    let prompt = economy
        .events()
        .open(OpenRequest { definition: "haggle".into(), ..appraisal(4) })
        .unwrap();
    assert_eq!(presenter.prompts.lock().len(), 1);

    tokio::time::sleep(Duration::from_secs(31)).await;
    let resolution = economy.events().wait(prompt.event).await.unwrap();

    assert_eq!(resolution.decision, Decision::TimedOut);
    assert_eq!(resolution.choice.as_deref(), Some("accept"));
    assert_eq!(economy.store().read_balance(PLAYER), 1000);
    assert_eq!(
        economy.events().choose(prompt.event, PLAYER, "push").await.unwrap_err(),
        EventError::Completed(prompt.event.0)
    );
    assert_eq!(presenter.resolutions.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stock_sold_elsewhere_completes_as_stale() {
    let economy = economy();
    grant(&economy, LedgerKey::Item(salmon()), 4).await;
    let prompt = economy.events().open(appraisal(4)).unwrap();

    // Sold through another path while the prompt was up.
    grant(&economy, LedgerKey::Item(salmon()), -4).await;

    let resolution = economy.events().choose(prompt.event, PLAYER, "sell").await.unwrap();
    assert!(matches!(resolution.outcome, ResolutionOutcome::StaleState(_)));
    assert_eq!(economy.store().read_balance(PLAYER), 0);
    assert!(resolution.side_effects.is_empty());
    assert!(matches!(economy.events().state(prompt.event), Some(EventState::Completed(_))));
}

#[tokio::test(start_paused = true)]
async fn test_keep_choice_leaves_stake_in_place() {
    let economy = economy();
    grant(&economy, LedgerKey::Item(salmon()), 4).await;
    let prompt = economy.events().open(appraisal(4)).unwrap();

    let resolution = economy.events().choose(prompt.event, PLAYER, "keep").await.unwrap();
    assert!(matches!(resolution.outcome, ResolutionOutcome::Committed { value: 0, consumed_items: false, .. }));
    assert_eq!(economy.store().read_item_quantity(PLAYER, &salmon()), 4);
}

#[tokio::test(start_paused = true)]
async fn test_failed_side_effect_does_not_undo_commit() {
    let mut config = EconomyConfig::default();
    config.events.rng_seed = Some(1);
    let economy = economy_with(&config, |b| b.with_side_effects(Arc::new(BrokenTools)));
    grant(&economy, LedgerKey::Item(salmon()), 4).await;
    let prompt = economy.events().open(appraisal(4)).unwrap();

    let resolution = economy.events().choose(prompt.event, PLAYER, "sell").await.unwrap();
    assert!(resolution.outcome.is_committed());
    assert!(matches!(resolution.side_effects.as_slice(), [SideEffectReport::Failed { .. }]));
    assert_eq!(economy.store().read_balance(PLAYER), 1500);
}

#[tokio::test(start_paused = true)]
async fn test_counters_follow_commit_only() {
    let (telemetry, counters) = ChannelTelemetry::bounded(64);
    let mut config = EconomyConfig::default();
    config.events.rng_seed = Some(1);
    let economy = economy_with(&config, |b| b.with_telemetry(Arc::new(telemetry)));
    grant(&economy, LedgerKey::Item(salmon()), 4).await;

    let prompt = economy.events().open(appraisal(4)).unwrap();
    economy.events().choose(prompt.event, PLAYER, "sell").await.unwrap();
    let emitted: Vec<Counter> = counters.try_iter().collect();
    let keys: Vec<&str> = emitted.iter().map(|c| c.key.as_str()).collect();
    assert!(keys.contains(&"interactive_events_triggered"));
    assert!(keys.contains(&"appraisal_sell"));
    assert!(keys.contains(&"balance"));
    assert!(keys.contains(&"item:salmon"));
    assert!(emitted.iter().any(|c| c.key == "total_money_earned" && c.delta == 1500));

    // Stock sold elsewhere after the prompt: stale, and no counters from the resolution.
    grant(&economy, LedgerKey::Item(salmon()), 4).await;
    let prompt = economy.events().open(appraisal(4)).unwrap();
    grant(&economy, LedgerKey::Item(salmon()), -4).await;
    counters.try_iter().for_each(drop);
    let resolution = economy.events().choose(prompt.event, PLAYER, "sell").await.unwrap();
    assert!(matches!(resolution.outcome, ResolutionOutcome::StaleState(_)));
    assert_eq!(counters.try_iter().count(), 0);
}

#[tokio::test]
async fn test_cache_grants_reach_telemetry() {
    let (telemetry, counters) = ChannelTelemetry::bounded(64);
    let economy = economy_with(&EconomyConfig::default(), |b| b.with_telemetry(Arc::new(telemetry)));

    grant(&economy, LedgerKey::Balance, 100).await;
    let emitted: Vec<Counter> = counters.try_iter().collect();
    assert_eq!(emitted, vec![Counter { entity: PLAYER, key: "balance".to_string(), delta: 100 }]);

    let refused = economy.cache().apply_delta(PLAYER, LedgerKey::Balance, -101, "fine").await;
    assert!(refused.is_err());
    assert_eq!(counters.try_iter().count(), 0);
}

#[tokio::test]
async fn test_unheld_stake_is_refused_at_open() {
    let economy = economy();
    assert!(matches!(
        economy.events().open(appraisal(4)),
        Err(EventError::InsufficientStake { required: 4, available: 0, .. })
    ));
    assert_eq!(economy.events().instance_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sale_trigger_opens_gated_event() {
    let catalogue = StaticCatalogue::from_toml_str(&format!(
        r#"{CATALOGUE}
        [[events]]
        key = "collector"
        timeout_secs = 10
        chance = 1.0
        condition = {{ type = "base_value", operator = ">=", value = 1000 }}

        [[events.choices]]
        id = "sell"
        outcomes = [{{ mul = 2.0 }}]
        "#
    ))
    .unwrap();
    let economy = Economy::open(&EconomyConfig::default(), Boundaries::new(Arc::new(catalogue))).unwrap();
    grant(&economy, LedgerKey::Item(salmon()), 4).await;
    let stake = vec![StakedItem { item: salmon(), quantity: 4 }];

    assert!(economy.events().roll_trigger(PLAYER, &stake[..], 999).is_none());

    let request = economy.events().roll_trigger(PLAYER, &stake, 1000).unwrap();
    assert_eq!(request.definition, "collector");
    let prompt = economy.events().open(request).unwrap();
    economy.events().choose(prompt.event, PLAYER, "sell").await.unwrap();
    assert_eq!(economy.store().read_balance(PLAYER), 2000);
}

#[tokio::test]
async fn test_cache_matches_store_after_mixed_writes() {
    let economy = economy();
    grant(&economy, LedgerKey::Balance, 500).await;
    grant(&economy, LedgerKey::Item(salmon()), 3).await;

    // Write around the cache through the coordinator.
    economy
        .coordinator()
        .run_default(PLAYER, |txn| {
            Box::pin(async move {
                txn.adjust_balance(PLAYER, -120).await?;
                txn.adjust_item_quantity(PLAYER, &salmon(), 2).await
            })
        })
        .await
        .unwrap();

    let cached = economy.cache().get_all(PLAYER).await;
    let stored = economy.store().read_snapshot(PLAYER);
    assert_eq!(cached, stored);
    assert_eq!(cached.balance, 380);
    assert_eq!(economy.cache().get(PLAYER, &LedgerKey::Item(salmon())).await, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_credits_both_land() {
    let economy = economy();
    let a = economy.coordinator().clone();
    let b = economy.coordinator().clone();

    let credit = |coordinator: tidewater_economy::TransactionCoordinator| async move {
        coordinator
            .run_default(PLAYER, |txn| Box::pin(async move { txn.adjust_balance(PLAYER, 100).await }))
            .await
    };
    let (first, second) = tokio::join!(tokio::spawn(credit(a)), tokio::spawn(credit(b)));
    first.unwrap().unwrap();
    second.unwrap().unwrap();

    assert_eq!(economy.store().read_balance(PLAYER), 200);
}

#[tokio::test]
async fn test_resolution_survives_restart() {
    let path = temp_wal_path();
    let mut config = EconomyConfig::default();
    config.store.path = Some(path.clone());
    config.events.rng_seed = Some(5);

    {
        let economy = economy_with(&config, |b| b);
        grant(&economy, LedgerKey::Item(salmon()), 4).await;
        let prompt = economy.events().open(appraisal(4)).unwrap();
        let resolution = economy.events().choose(prompt.event, PLAYER, "sell").await.unwrap();
        assert!(matches!(resolution.outcome, ResolutionOutcome::Committed { lsn: Some(_), .. }));
    }

    let reopened = economy_with(&config, |b| b);
    assert_eq!(reopened.store().read_balance(PLAYER), 1500);
    assert_eq!(reopened.store().read_item_quantity(PLAYER, &salmon()), 0);
    assert_eq!(reopened.store().log_entries(PLAYER).last().unwrap().reason, "interactive_appraisal");

    drop(reopened);
    std::fs::remove_file(&path).ok();
}
