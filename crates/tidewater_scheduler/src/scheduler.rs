//! # Ambient Event Scheduler
//!
//! **Single-flight activation on a periodic tick.**
//!
//! ```text
//! tick_at(now)
//!   ├── active event past its end?  ── expire it, end the tick
//!   ├── active event still running? ── nothing (single-flight)
//!   └── idle:
//!         eligible = window contains now && cooldown elapsed
//!         visit by priority (desc, declaration order on ties)
//!         first successful draw activates; the rest wait for a later tick
//! ```
//!
//! Cooldown is measured from activation. Lower-priority candidates that were
//! not visited keep their cooldown untouched.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::definition::{AmbientDefinition, Window};
use crate::error::{SchedulerError, SchedulerResult};

/// The ambient event holding the slot.
#[derive(Clone, Debug, PartialEq)]
pub struct ActiveEvent {
    /// Definition key.
    pub key: String,
    /// Activation time.
    pub started: NaiveDateTime,
    /// Expiry time.
    pub ends: NaiveDateTime,
    /// Modifiers in force.
    pub effects: BTreeMap<String, f64>,
}

/// Result of one tick.
#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    /// An event was activated.
    Started(ActiveEvent),
    /// The active event expired; nothing else happened this tick.
    Expired(ActiveEvent),
    /// The slot is held by this key.
    Active(String),
    /// Nothing fired.
    Idle {
        /// Candidates that were eligible and drawn against.
        eligible: usize,
    },
}

/// Notification sent to listeners.
#[derive(Clone, Debug, PartialEq)]
pub enum SchedulerEvent {
    /// An event became active.
    Started {
        /// The activation.
        event: ActiveEvent,
        /// Authored start message.
        announcement: Option<String>,
    },
    /// The active event ended.
    Expired {
        /// The activation that ended.
        event: ActiveEvent,
        /// Authored end message.
        announcement: Option<String>,
    },
}

struct Entry {
    definition: AmbientDefinition,
    window: Result<Window, String>,
}

struct State {
    active: Option<ActiveEvent>,
    last_fired: HashMap<String, NaiveDateTime>,
    rng: ChaCha8Rng,
}

/// Time-windowed, single-flight ambient event scheduler.
pub struct Scheduler {
    /// Visiting order: priority descending, declaration order on ties.
    entries: Vec<Entry>,
    state: Mutex<State>,
    listeners: Mutex<Vec<Sender<SchedulerEvent>>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("definitions", &self.entries.len())
            .field("active", &self.state.lock().active.as_ref().map(|a| a.key.clone()))
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Builds a scheduler. Invalid definitions are kept but never eligible.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::DuplicateKey` if two definitions share a key.
    pub fn new(config: &SchedulerConfig) -> SchedulerResult<Self> {
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(config.events.len());
        for definition in &config.events {
            if !seen.insert(definition.key.as_str()) {
                return Err(SchedulerError::DuplicateKey(definition.key.clone()));
            }
            let window = definition.compile();
            if let Err(reason) = &window {
                warn!(key = %definition.key, %reason, "ambient event is never eligible");
            }
            entries.push(Entry { definition: definition.clone(), window });
        }
        // Stable sort keeps declaration order on equal priority.
        entries.sort_by(|a, b| b.definition.priority.cmp(&a.definition.priority));

        let rng = match config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        info!(definitions = entries.len(), "ambient scheduler ready");
        Ok(Self {
            entries,
            state: Mutex::new(State { active: None, last_fired: HashMap::new(), rng }),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Registers a listener. Notifications that do not fit are dropped.
    #[must_use]
    pub fn subscribe(&self, capacity: usize) -> Receiver<SchedulerEvent> {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        self.listeners.lock().push(tx);
        rx
    }

    /// Runs one tick at `now`.
    pub fn tick_at(&self, now: NaiveDateTime) -> TickOutcome {
        let (outcome, notice) = {
            let mut state = self.state.lock();
            self.tick_locked(&mut state, now)
        };
        if let Some(notice) = notice {
            self.notify(notice);
        }
        outcome
    }

    fn tick_locked(&self, state: &mut State, now: NaiveDateTime) -> (TickOutcome, Option<SchedulerEvent>) {
        if let Some(active) = &state.active {
            if now < active.ends {
                return (TickOutcome::Active(active.key.clone()), None);
            }
            let expired = state.active.take();
            return match expired {
                Some(event) => {
                    info!(key = %event.key, "ambient event expired");
                    let notice = self.expired_notice(&event);
                    (TickOutcome::Expired(event), Some(notice))
                }
                None => (TickOutcome::Idle { eligible: 0 }, None),
            };
        }

        let mut eligible = 0;
        for entry in &self.entries {
            let Ok(window) = &entry.window else {
                continue;
            };
            let definition = &entry.definition;
            if !window.contains(now) || !cooldown_elapsed(state.last_fired.get(&definition.key), definition, now) {
                continue;
            }
            eligible += 1;

            let hit = definition.chance >= 1.0 || state.rng.gen::<f64>() < definition.chance;
            if !hit {
                debug!(key = %definition.key, chance = definition.chance, "ambient draw missed");
                continue;
            }

            let event = activate(state, definition, now);
            info!(key = %event.key, ends = %event.ends, priority = definition.priority, "ambient event started");
            let notice = SchedulerEvent::Started {
                event: event.clone(),
                announcement: definition.start_message.clone(),
            };
            return (TickOutcome::Started(event), Some(notice));
        }
        (TickOutcome::Idle { eligible }, None)
    }

    /// Ticks every `interval` on local wall-clock time until `shutdown`
    /// becomes true or its sender is dropped.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(?interval, "ambient scheduler running");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = self.tick_at(Local::now().naive_local());
                    debug!(?outcome, "ambient tick");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("ambient scheduler stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Activates `key` now, ignoring its window, cooldown and chance.
    ///
    /// # Errors
    ///
    /// `UnknownDefinition`, `NeverEligible` for an invalid definition, or
    /// `AlreadyActive` if the slot is held.
    pub fn force_start(&self, key: &str, now: NaiveDateTime) -> SchedulerResult<ActiveEvent> {
        let entry = self
            .entries
            .iter()
            .find(|entry| entry.definition.key == key)
            .ok_or_else(|| SchedulerError::UnknownDefinition(key.to_string()))?;
        if let Err(reason) = &entry.window {
            return Err(SchedulerError::NeverEligible { key: key.to_string(), reason: reason.clone() });
        }

        let event = {
            let mut state = self.state.lock();
            if let Some(active) = &state.active {
                return Err(SchedulerError::AlreadyActive(active.key.clone()));
            }
            activate(&mut state, &entry.definition, now)
        };
        info!(key, ends = %event.ends, "ambient event force-started");
        self.notify(SchedulerEvent::Started {
            event: event.clone(),
            announcement: entry.definition.start_message.clone(),
        });
        Ok(event)
    }

    /// Ends the active event early.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::NothingActive` if the slot is free.
    pub fn force_end(&self, now: NaiveDateTime) -> SchedulerResult<ActiveEvent> {
        let mut event = self.state.lock().active.take().ok_or(SchedulerError::NothingActive)?;
        event.ends = now.min(event.ends);
        info!(key = %event.key, "ambient event force-ended");
        let notice = self.expired_notice(&event);
        self.notify(notice);
        Ok(event)
    }

    /// The active event, if any.
    #[must_use]
    pub fn active(&self) -> Option<ActiveEvent> {
        self.state.lock().active.clone()
    }

    /// Modifiers of the active event (empty when idle).
    #[must_use]
    pub fn active_effects(&self) -> BTreeMap<String, f64> {
        self.state
            .lock()
            .active
            .as_ref()
            .map(|active| active.effects.clone())
            .unwrap_or_default()
    }

    /// When `key` last activated.
    #[must_use]
    pub fn last_fired(&self, key: &str) -> Option<NaiveDateTime> {
        self.state.lock().last_fired.get(key).copied()
    }

    fn expired_notice(&self, event: &ActiveEvent) -> SchedulerEvent {
        let announcement = self
            .entries
            .iter()
            .find(|entry| entry.definition.key == event.key)
            .and_then(|entry| entry.definition.end_message.clone());
        SchedulerEvent::Expired { event: event.clone(), announcement }
    }

    fn notify(&self, notice: SchedulerEvent) {
        self.listeners.lock().retain(|listener| match listener.try_send(notice.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("scheduler listener full; notification dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

fn cooldown_elapsed(last: Option<&NaiveDateTime>, definition: &AmbientDefinition, now: NaiveDateTime) -> bool {
    let Some(last) = last else {
        return true;
    };
    chrono::Duration::from_std(definition.cooldown())
        .ok()
        .and_then(|cooldown| last.checked_add_signed(cooldown))
        .is_some_and(|ready_at| now >= ready_at)
}

fn activate(state: &mut State, definition: &AmbientDefinition, now: NaiveDateTime) -> ActiveEvent {
    let ends = chrono::Duration::from_std(definition.duration())
        .ok()
        .and_then(|duration| now.checked_add_signed(duration))
        .unwrap_or(NaiveDateTime::MAX);
    let event = ActiveEvent {
        key: definition.key.clone(),
        started: now,
        ends,
        effects: definition.effects.clone(),
    };
    state.last_fired.insert(definition.key.clone(), now);
    state.active = Some(event.clone());
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(hour, minute, 0).unwrap()
    }

    fn definition(key: &str, priority: i32, chance: f64) -> AmbientDefinition {
        AmbientDefinition {
            key: key.into(),
            priority,
            chance,
            cooldown_minutes: 120,
            duration_minutes: 30,
            days: Vec::new(),
            time_ranges: Vec::new(),
            effects: BTreeMap::from([("sell_multiplier".to_string(), 1.5)]),
            start_message: Some(format!("{key} begins")),
            end_message: Some(format!("{key} is over")),
        }
    }

    fn scheduler(events: Vec<AmbientDefinition>) -> Scheduler {
        Scheduler::new(&SchedulerConfig { tick_interval_secs: 60, rng_seed: Some(11), events }).unwrap()
    }

    #[test]
    fn test_highest_priority_hit_wins_and_others_keep_cooldown() {
        let scheduler = scheduler(vec![definition("low", 5, 1.0), definition("high", 10, 1.0)]);

        let outcome = scheduler.tick_at(at(12, 0));
        assert!(matches!(outcome, TickOutcome::Started(ref event) if event.key == "high"));
        assert_eq!(scheduler.last_fired("high"), Some(at(12, 0)));
        assert_eq!(scheduler.last_fired("low"), None);
        assert_eq!(scheduler.active_effects()["sell_multiplier"], 1.5);
    }

    #[test]
    fn test_single_flight_then_expiry_ends_the_tick() {
        let scheduler = scheduler(vec![definition("high", 10, 1.0), definition("low", 5, 1.0)]);
        scheduler.tick_at(at(12, 0));

        assert_eq!(scheduler.tick_at(at(12, 10)), TickOutcome::Active("high".into()));
        assert!(matches!(scheduler.tick_at(at(12, 30)), TickOutcome::Expired(ref event) if event.key == "high"));
        assert_eq!(scheduler.active(), None);

        // "high" is cooling down; "low" gets its turn.
        assert!(matches!(scheduler.tick_at(at(12, 31)), TickOutcome::Started(ref event) if event.key == "low"));
    }

    #[test]
    fn test_cooldown_counts_from_activation() {
        let scheduler = scheduler(vec![definition("only", 0, 1.0)]);
        scheduler.tick_at(at(10, 0));
        scheduler.tick_at(at(10, 30));

        assert_eq!(scheduler.tick_at(at(11, 59)), TickOutcome::Idle { eligible: 0 });
        assert!(matches!(scheduler.tick_at(at(12, 0)), TickOutcome::Started(_)));
    }

    #[test]
    fn test_zero_chance_never_fires() {
        let scheduler = scheduler(vec![definition("never", 0, 0.0)]);
        for minute in 0..60 {
            assert_eq!(scheduler.tick_at(at(8, minute)), TickOutcome::Idle { eligible: 1 });
        }
    }

    #[test]
    fn test_partial_chance_eventually_fires() {
        let scheduler = scheduler(vec![definition("sometimes", 0, 0.3)]);
        let fired = (0..60).any(|minute| matches!(scheduler.tick_at(at(8, minute)), TickOutcome::Started(_)));
        assert!(fired);
    }

    #[test]
    fn test_window_excludes_outside_hours() {
        let mut evening = definition("evening", 0, 1.0);
        evening.time_ranges = vec!["18:00-20:00".into()];
        let scheduler = scheduler(vec![evening]);

        assert_eq!(scheduler.tick_at(at(12, 0)), TickOutcome::Idle { eligible: 0 });
        assert!(matches!(scheduler.tick_at(at(18, 0)), TickOutcome::Started(_)));
    }

    #[test]
    fn test_invalid_definition_is_never_eligible() {
        let mut broken = definition("broken", 100, 1.0);
        broken.time_ranges = vec!["late".into()];
        let scheduler = scheduler(vec![broken, definition("fine", 1, 1.0)]);

        assert!(matches!(scheduler.tick_at(at(12, 0)), TickOutcome::Started(ref event) if event.key == "fine"));
        assert!(matches!(
            scheduler.force_start("broken", at(12, 5)),
            Err(SchedulerError::NeverEligible { .. })
        ));
    }

    #[test]
    fn test_duplicate_keys_are_rejected() {
        let config = SchedulerConfig {
            events: vec![definition("twin", 0, 1.0), definition("twin", 1, 1.0)],
            ..SchedulerConfig::default()
        };
        assert!(matches!(Scheduler::new(&config), Err(SchedulerError::DuplicateKey(_))));
    }

    #[test]
    fn test_force_controls_respect_single_flight() {
        let scheduler = scheduler(vec![definition("a", 0, 0.0), definition("b", 0, 0.0)]);
        let listener = scheduler.subscribe(8);

        assert!(matches!(scheduler.force_end(at(9, 0)), Err(SchedulerError::NothingActive)));
        scheduler.force_start("a", at(9, 0)).unwrap();
        assert!(matches!(scheduler.force_start("b", at(9, 1)), Err(SchedulerError::AlreadyActive(ref k)) if k == "a"));
        assert!(matches!(scheduler.force_start("zzz", at(9, 1)), Err(SchedulerError::UnknownDefinition(_))));

        let ended = scheduler.force_end(at(9, 10)).unwrap();
        assert_eq!(ended.ends, at(9, 10));

        let notices: Vec<_> = listener.try_iter().collect();
        assert_eq!(notices.len(), 2);
        assert!(matches!(&notices[0], SchedulerEvent::Started { announcement: Some(text), .. } if text == "a begins"));
        assert!(matches!(&notices[1], SchedulerEvent::Expired { announcement: Some(text), .. } if text == "a is over"));
    }

    #[test]
    fn test_dropped_listeners_are_pruned() {
        let scheduler = scheduler(vec![definition("a", 0, 1.0)]);
        drop(scheduler.subscribe(1));
        scheduler.tick_at(at(9, 0));
        assert!(scheduler.listeners.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_shutdown() {
        let scheduler = std::sync::Arc::new(scheduler(vec![definition("always", 0, 1.0)]));
        let (stop, shutdown) = watch::channel(false);

        let runner = {
            let scheduler = std::sync::Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.run(Duration::from_secs(60), shutdown).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(scheduler.active().map(|a| a.key), Some("always".to_string()));

        stop.send(true).unwrap();
        runner.await.unwrap();
    }
}
