//! # Content Catalogue Boundary
//!
//! Event definitions and item metadata are authored content, read-only to
//! the ledger. [`Catalogue`] is the seam; [`StaticCatalogue`] serves content
//! loaded from TOML:
//!
//! ```toml
//! [items.salmon]
//! display_name = "Salmon"
//! base_value = 120
//!
//! [[events]]
//! key = "haggle"
//! category = "fishing"
//! timeout_secs = 30
//!
//! [[events.choices]]
//! id = "push"
//! label = "Push for a better price"
//! risky = true
//! outcomes = [
//!     { mul = 1.5, weight = 0.5 },
//!     { mul = 0.8, weight = 0.5 },
//! ]
//! ```
//!
//! A definition with a `chance` is also a trigger candidate at the sell
//! decision point, optionally gated by a `condition`:
//!
//! ```toml
//! [[events]]
//! key = "collector"
//! chance = 0.05
//! condition = { type = "base_value", operator = ">=", value = 500 }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult, EventError, EventResult};
use crate::fixed_point::FixedPoint;
use crate::ledger::ItemKey;

/// A best-effort effect applied after a resolution commits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SideEffect {
    /// Change the durability of the acting entity's equipped tool.
    Durability {
        /// Signed durability change.
        delta: i64,
    },
    /// Grant a timed buff.
    Buff {
        /// Buff identifier.
        kind: String,
        /// Duration in seconds.
        duration_secs: u64,
    },
}

/// One weighted outcome of a choice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeDefinition {
    /// Multiplier applied to the base value.
    #[serde(default = "one")]
    pub mul: FixedPoint,
    /// Flat adjustment added after multiplying.
    #[serde(default)]
    pub flat: i64,
    /// Relative sampling weight. Zero-weight outcomes are never sampled.
    #[serde(default = "one")]
    pub weight: FixedPoint,
    /// Overrides whether staked items are consumed.
    #[serde(default)]
    pub consume_items: Option<bool>,
    /// Text shown to the player when this outcome lands.
    #[serde(default)]
    pub message: Option<String>,
    /// Effects applied after commit.
    #[serde(default)]
    pub effects: Vec<SideEffect>,
}

fn one() -> FixedPoint {
    FixedPoint::ONE
}

impl OutcomeDefinition {
    /// The neutral outcome: base value unchanged, nothing else.
    #[must_use]
    pub fn neutral() -> Self {
        Self {
            mul: FixedPoint::ONE,
            flat: 0,
            weight: FixedPoint::ONE,
            consume_items: None,
            message: None,
            effects: Vec::new(),
        }
    }

    /// `floor(base * mul) + flat`, saturating.
    #[inline]
    #[must_use]
    pub fn final_value(&self, base_value: u64) -> i64 {
        self.mul.mul_floor(base_value).saturating_add(self.flat)
    }

    /// Returns true if the outcome can be sampled.
    #[inline]
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.weight.is_positive()
    }
}

/// One selectable choice of an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceDefinition {
    /// Stable id sent back by the presentation layer.
    pub id: String,
    /// Button text.
    #[serde(default)]
    pub label: String,
    /// Weighted outcomes, in declaration order.
    #[serde(default)]
    pub outcomes: Vec<OutcomeDefinition>,
    /// Overrides whether staked items are consumed.
    #[serde(default)]
    pub consume_items: Option<bool>,
    /// Risky choices record `<event>_wins` / `<event>_losses`.
    #[serde(default)]
    pub risky: bool,
    /// Extra counter incremented when this choice is taken.
    #[serde(default)]
    pub counter: Option<String>,
}

/// An interactive event as authored in the catalogue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDefinition {
    /// Catalogue key.
    pub key: String,
    /// Category of the audit row.
    #[serde(default = "default_category")]
    pub category: String,
    /// Decision window in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Whether staked items are consumed unless a choice or outcome says otherwise.
    #[serde(default = "default_consume")]
    pub consume_items: bool,
    /// Choices in declaration order.
    #[serde(default)]
    pub choices: Vec<ChoiceDefinition>,
    /// Outcome used when no choice has a reachable outcome.
    #[serde(default)]
    pub timeout_default: Option<OutcomeDefinition>,
    /// Trigger probability at the sell decision point. `None` never triggers.
    #[serde(default)]
    pub chance: Option<FixedPoint>,
    /// Gate checked before the chance is rolled.
    #[serde(default)]
    pub condition: Option<TriggerCondition>,
}

/// What a trigger condition measures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// Base value of the stake.
    BaseValue,
    /// Number of distinct item types staked.
    #[serde(alias = "fish_count")]
    ItemCount,
    /// Committed balance of the acting entity.
    #[serde(alias = "user_balance")]
    Balance,
    /// Highest unit value among the staked item types.
    #[serde(alias = "max_fish_value")]
    MaxItemValue,
    /// Any staked item is of the `legendary` rarity. Ignores operator and value.
    HasLegendary,
}

/// Comparison between the measured value and the condition's value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    /// `>=`
    #[default]
    #[serde(rename = ">=")]
    AtLeast,
    /// `>`
    #[serde(rename = ">")]
    Above,
    /// `<=`
    #[serde(rename = "<=")]
    AtMost,
    /// `<`
    #[serde(rename = "<")]
    Below,
    /// `==`
    #[serde(rename = "==")]
    Equal,
    /// `!=`
    #[serde(rename = "!=")]
    NotEqual,
}

impl Comparison {
    /// Applies the comparison.
    #[must_use]
    pub fn holds(self, measured: i64, value: i64) -> bool {
        match self {
            Self::AtLeast => measured >= value,
            Self::Above => measured > value,
            Self::AtMost => measured <= value,
            Self::Below => measured < value,
            Self::Equal => measured == value,
            Self::NotEqual => measured != value,
        }
    }
}

/// Gate on a trigger candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerCondition {
    /// Measured quantity.
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    /// Comparison applied to it.
    #[serde(default)]
    pub operator: Comparison,
    /// Right-hand side.
    #[serde(default)]
    pub value: i64,
}

/// Facts a trigger condition is evaluated against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TriggerContext {
    /// Base value of the stake.
    pub base_value: u64,
    /// Distinct item types staked.
    pub item_count: usize,
    /// Committed balance of the acting entity.
    pub balance: u64,
    /// Highest unit value among the staked items.
    pub max_item_value: u64,
    /// Whether a legendary item is staked.
    pub has_legendary: bool,
}

impl TriggerCondition {
    /// Returns true if the condition passes for `context`.
    #[must_use]
    pub fn holds(&self, context: &TriggerContext) -> bool {
        let saturate = |value: u64| i64::try_from(value).unwrap_or(i64::MAX);
        let measured = match self.kind {
            ConditionKind::HasLegendary => return context.has_legendary,
            ConditionKind::BaseValue => saturate(context.base_value),
            ConditionKind::ItemCount => i64::try_from(context.item_count).unwrap_or(i64::MAX),
            ConditionKind::Balance => saturate(context.balance),
            ConditionKind::MaxItemValue => saturate(context.max_item_value),
        };
        self.operator.holds(measured, self.value)
    }
}

fn default_category() -> String {
    "activity".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_consume() -> bool {
    true
}

impl EventDefinition {
    /// Decision window.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Finds a choice by id.
    #[must_use]
    pub fn choice_index(&self, id: &str) -> Option<usize> {
        self.choices.iter().position(|choice| choice.id == id)
    }

    /// Outcome used when a choice has nothing to sample.
    #[must_use]
    pub fn fallback_outcome(&self) -> OutcomeDefinition {
        self.timeout_default.clone().unwrap_or_else(OutcomeDefinition::neutral)
    }

    /// Checks the definition is usable.
    ///
    /// # Errors
    ///
    /// Returns `EventError::InvalidDefinition` naming the first problem.
    pub fn validate(&self) -> EventResult<()> {
        let invalid = |reason: String| EventError::InvalidDefinition { key: self.key.clone(), reason };

        if self.key.is_empty() {
            return Err(invalid("empty key".into()));
        }
        if self.timeout_secs == 0 {
            return Err(invalid("timeout_secs must be > 0".into()));
        }
        let mut seen = HashSet::new();
        for choice in &self.choices {
            if choice.id.is_empty() {
                return Err(invalid("choice with empty id".into()));
            }
            if !seen.insert(choice.id.as_str()) {
                return Err(invalid(format!("duplicate choice id {}", choice.id)));
            }
            if choice.outcomes.iter().any(|outcome| outcome.weight.is_negative()) {
                return Err(invalid(format!("choice {} has a negative weight", choice.id)));
            }
        }
        if let Some(chance) = self.chance {
            if chance.is_negative() || chance > FixedPoint::ONE {
                return Err(invalid(format!("chance must be within 0.0..=1.0, got {chance}")));
            }
        }
        if self.condition.is_some() && self.chance.is_none() {
            return Err(invalid("condition without a chance never triggers".into()));
        }
        Ok(())
    }
}

/// Display and pricing data of an item type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Name shown to players.
    #[serde(default)]
    pub display_name: String,
    /// Value of one unit, in currency.
    pub base_value: u64,
    /// Rarity tier name.
    #[serde(default = "default_rarity")]
    pub rarity: String,
}

fn default_rarity() -> String {
    "common".to_string()
}

/// Read-only access to authored content.
pub trait Catalogue: Send + Sync {
    /// Looks up an event definition.
    fn resolve_event_definition(&self, key: &str) -> Option<Arc<EventDefinition>>;

    /// Looks up item metadata.
    fn resolve_item_metadata(&self, item: &ItemKey) -> Option<ItemMetadata>;

    /// Definitions with a trigger chance, in declaration order.
    fn trigger_candidates(&self) -> Vec<Arc<EventDefinition>> {
        Vec::new()
    }
}

#[derive(Deserialize)]
struct CatalogueFile {
    #[serde(default)]
    items: HashMap<ItemKey, ItemMetadata>,
    #[serde(default)]
    events: Vec<EventDefinition>,
}

/// In-memory catalogue, usually loaded from TOML.
#[derive(Clone, Debug, Default)]
pub struct StaticCatalogue {
    events: HashMap<String, Arc<EventDefinition>>,
    /// Event keys in declaration order.
    order: Vec<String>,
    items: HashMap<ItemKey, ItemMetadata>,
}

impl StaticCatalogue {
    /// Creates an empty catalogue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a catalogue from TOML text. Every definition is validated.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed TOML and
    /// `ConfigError::Invalid` for invalid or duplicate definitions.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let file: CatalogueFile = toml::from_str(text)?;
        let mut catalogue = Self { events: HashMap::new(), order: Vec::new(), items: file.items };
        for definition in file.events {
            if catalogue.events.contains_key(&definition.key) {
                return Err(ConfigError::Invalid(format!("duplicate event key {}", definition.key)));
            }
            catalogue
                .insert_event(definition)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(catalogue)
    }

    /// Loads a catalogue file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read, otherwise as
    /// [`StaticCatalogue::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Adds or replaces an event definition. A replaced definition keeps
    /// its place in the trigger order.
    ///
    /// # Errors
    ///
    /// Returns `EventError::InvalidDefinition` if validation fails.
    pub fn insert_event(&mut self, definition: EventDefinition) -> EventResult<()> {
        definition.validate()?;
        let key = definition.key.clone();
        if self.events.insert(key.clone(), Arc::new(definition)).is_none() {
            self.order.push(key);
        }
        Ok(())
    }

    /// Adds or replaces item metadata.
    pub fn insert_item(&mut self, item: ItemKey, metadata: ItemMetadata) {
        self.items.insert(item, metadata);
    }

    /// Number of event definitions.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

impl Catalogue for StaticCatalogue {
    fn resolve_event_definition(&self, key: &str) -> Option<Arc<EventDefinition>> {
        self.events.get(key).cloned()
    }

    fn resolve_item_metadata(&self, item: &ItemKey) -> Option<ItemMetadata> {
        self.items.get(item).cloned()
    }

    fn trigger_candidates(&self) -> Vec<Arc<EventDefinition>> {
        self.order
            .iter()
            .filter_map(|key| self.events.get(key))
            .filter(|definition| definition.chance.is_some())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOGUE: &str = r#"
        [items.salmon]
        display_name = "Salmon"
        base_value = 120
        rarity = "uncommon"

        [items.boot]
        base_value = 1

        [[events]]
        key = "haggle"
        category = "fishing"
        timeout_secs = 20

        [[events.choices]]
        id = "push"
        label = "Push for more"
        risky = true
        outcomes = [
            { mul = 1.5, weight = 0.5, message = "They cave." },
            { mul = 0.8, weight = 0.5, effects = [{ type = "buff", kind = "sulking", duration_secs = 60 }] },
        ]

        [[events.choices]]
        id = "accept"
        label = "Take the offer"
        consume_items = true
        outcomes = [{ mul = 1.0 }]

        [[events]]
        key = "bare"
    "#;

    #[test]
    fn test_load_catalogue() {
        let catalogue = StaticCatalogue::from_toml_str(CATALOGUE).unwrap();
        assert_eq!(catalogue.event_count(), 2);

        let haggle = catalogue.resolve_event_definition("haggle").unwrap();
        assert_eq!(haggle.category, "fishing");
        assert_eq!(haggle.timeout(), Duration::from_secs(20));
        assert!(haggle.consume_items);
        assert_eq!(haggle.choice_index("accept"), Some(1));
        assert_eq!(haggle.choices[0].outcomes[0].final_value(1000), 1500);
        assert_eq!(
            haggle.choices[0].outcomes[1].effects,
            vec![SideEffect::Buff { kind: "sulking".into(), duration_secs: 60 }]
        );
        // Omitted weight and mul default to 1.0.
        assert_eq!(haggle.choices[1].outcomes[0], OutcomeDefinition {
            consume_items: None,
            ..OutcomeDefinition::neutral()
        });

        let salmon = catalogue.resolve_item_metadata(&ItemKey::new("salmon")).unwrap();
        assert_eq!(salmon.base_value, 120);
        assert_eq!(
            catalogue.resolve_item_metadata(&ItemKey::new("boot")).unwrap().rarity,
            "common"
        );
    }

    #[test]
    fn test_defaults_for_bare_definition() {
        let catalogue = StaticCatalogue::from_toml_str(CATALOGUE).unwrap();
        let bare = catalogue.resolve_event_definition("bare").unwrap();
        assert_eq!(bare.category, "activity");
        assert_eq!(bare.timeout_secs, 30);
        assert!(bare.choices.is_empty());
        assert_eq!(bare.fallback_outcome(), OutcomeDefinition::neutral());
    }

    #[test]
    fn test_duplicate_choice_ids_rejected() {
        let text = r#"
            [[events]]
            key = "twice"
            choices = [{ id = "a" }, { id = "a" }]
        "#;
        let err = StaticCatalogue::from_toml_str(text).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(reason) if reason.contains("duplicate choice id")));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let definition = EventDefinition {
            key: "bad".into(),
            category: default_category(),
            timeout_secs: 10,
            consume_items: true,
            choices: vec![ChoiceDefinition {
                id: "x".into(),
                label: String::new(),
                outcomes: vec![OutcomeDefinition { weight: FixedPoint::from_bp(-1), ..OutcomeDefinition::neutral() }],
                consume_items: None,
                risky: false,
                counter: None,
            }],
            timeout_default: None,
            chance: None,
            condition: None,
        };
        assert!(matches!(definition.validate(), Err(EventError::InvalidDefinition { .. })));
    }

    #[test]
    fn test_trigger_fields_parse_in_declaration_order() {
        let text = r#"
            [[events]]
            key = "storm"
            chance = 0.25
            condition = { type = "user_balance", operator = "<", value = 100 }

            [[events]]
            key = "manual"

            [[events]]
            key = "collector"
            chance = 1.0
            condition = { type = "has_legendary" }
        "#;
        let catalogue = StaticCatalogue::from_toml_str(text).unwrap();
        let keys: Vec<_> = catalogue.trigger_candidates().iter().map(|d| d.key.clone()).collect();
        assert_eq!(keys, ["storm", "collector"]);

        let storm = catalogue.resolve_event_definition("storm").unwrap();
        assert_eq!(storm.chance, Some(FixedPoint::from_bp(2500)));
        assert_eq!(
            storm.condition,
            Some(TriggerCondition { kind: ConditionKind::Balance, operator: Comparison::Below, value: 100 })
        );
        let collector = catalogue.resolve_event_definition("collector").unwrap();
        assert_eq!(collector.condition.map(|c| c.operator), Some(Comparison::AtLeast));
    }

    #[test]
    fn test_out_of_range_chance_rejected() {
        let err = StaticCatalogue::from_toml_str("[[events]]\nkey = \"greedy\"\nchance = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(reason) if reason.contains("chance")));

        let err = StaticCatalogue::from_toml_str(
            "[[events]]\nkey = \"odd\"\nchance = 0.5\ncondition = { type = \"rod_durability\" }\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_condition_comparisons() {
        let context = TriggerContext { base_value: 500, item_count: 2, balance: 40, max_item_value: 300, has_legendary: false };
        let check = |kind, operator, value| TriggerCondition { kind, operator, value }.holds(&context);

        assert!(check(ConditionKind::BaseValue, Comparison::AtLeast, 500));
        assert!(!check(ConditionKind::BaseValue, Comparison::Above, 500));
        assert!(check(ConditionKind::ItemCount, Comparison::Equal, 2));
        assert!(check(ConditionKind::Balance, Comparison::Below, 100));
        assert!(!check(ConditionKind::MaxItemValue, Comparison::AtMost, 299));
        assert!(check(ConditionKind::MaxItemValue, Comparison::NotEqual, 299));
        assert!(!check(ConditionKind::HasLegendary, Comparison::AtLeast, 0));
    }
}
