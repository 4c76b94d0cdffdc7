//! # Outcome Resolution Math
//!
//! Pure functions used by the event engine: weighted sampling, trigger
//! rolls and the maximin safe default. No I/O, no clocks, no shared state.
//!
//! ## Safe default (maximin)
//!
//! ```text
//! for each choice:      floor = min(final_value(outcome)) over weight > 0
//! safe default:         choice with the highest floor (earliest wins ties)
//! ```
//!
//! A choice whose outcomes all carry zero weight has no floor and can never
//! be the safe default.

use rand::Rng;

use crate::catalogue::{ChoiceDefinition, EventDefinition, OutcomeDefinition};
use crate::fixed_point::FixedPoint;

/// Worst reachable result of a choice, or `None` if nothing is reachable.
#[must_use]
pub fn choice_floor(choice: &ChoiceDefinition, base_value: u64) -> Option<i64> {
    choice
        .outcomes
        .iter()
        .filter(|outcome| outcome.is_reachable())
        .map(|outcome| outcome.final_value(base_value))
        .min()
}

/// Index of the choice with the highest guaranteed result.
///
/// Returns `None` if no choice has a reachable outcome.
#[must_use]
pub fn select_safe_default(definition: &EventDefinition, base_value: u64) -> Option<usize> {
    let mut best: Option<(usize, i64)> = None;
    for (index, choice) in definition.choices.iter().enumerate() {
        let Some(floor) = choice_floor(choice, base_value) else {
            continue;
        };
        // Strict comparison keeps the earliest declared choice on ties.
        if best.map_or(true, |(_, best_floor)| floor > best_floor) {
            best = Some((index, floor));
        }
    }
    best.map(|(index, _)| index)
}

/// Rolls a trigger chance. Zero never hits and 1.0 always does.
pub fn roll_chance<R: Rng + ?Sized>(chance: FixedPoint, rng: &mut R) -> bool {
    if !chance.is_positive() {
        return false;
    }
    if chance >= FixedPoint::ONE {
        return true;
    }
    rng.gen_range(0..FixedPoint::ONE.raw()) < chance.raw()
}

/// Samples an outcome by cumulative weight.
///
/// Zero-weight outcomes are never selected. Returns `None` if the total
/// weight is zero.
pub fn sample_outcome<R: Rng + ?Sized>(outcomes: &[OutcomeDefinition], rng: &mut R) -> Option<usize> {
    let total: u64 = outcomes
        .iter()
        .filter(|outcome| outcome.is_reachable())
        .map(|outcome| outcome.weight.raw().unsigned_abs())
        .sum();
    if total == 0 {
        return None;
    }

    let roll = rng.gen_range(0..total);
    let mut cumulative = 0u64;
    for (index, outcome) in outcomes.iter().enumerate() {
        if !outcome.is_reachable() {
            continue;
        }
        cumulative += outcome.weight.raw().unsigned_abs();
        if roll < cumulative {
            return Some(index);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn outcome(mul_bp: i64, weight_bp: i64) -> OutcomeDefinition {
        OutcomeDefinition {
            mul: FixedPoint::from_bp(mul_bp),
            weight: FixedPoint::from_bp(weight_bp),
            ..OutcomeDefinition::neutral()
        }
    }

    fn choice(id: &str, outcomes: Vec<OutcomeDefinition>) -> ChoiceDefinition {
        ChoiceDefinition {
            id: id.to_string(),
            label: String::new(),
            outcomes,
            consume_items: None,
            risky: false,
            counter: None,
        }
    }

    fn definition(choices: Vec<ChoiceDefinition>) -> EventDefinition {
        EventDefinition {
            key: "test".into(),
            category: "test".into(),
            timeout_secs: 30,
            consume_items: true,
            choices,
            timeout_default: None,
            chance: None,
            condition: None,
        }
    }

    #[test]
    fn test_maximin_prefers_guaranteed_choice() {
        // A: x1.5 or x0.8 (floor 800). B: x1.0 (floor 1000).
        let def = definition(vec![
            choice("a", vec![outcome(15_000, 5_000), outcome(8_000, 5_000)]),
            choice("b", vec![outcome(10_000, 10_000)]),
        ]);
        assert_eq!(select_safe_default(&def, 1000), Some(1));
    }

    #[test]
    fn test_maximin_tie_keeps_first_declared() {
        let def = definition(vec![
            choice("first", vec![outcome(10_000, 1)]),
            choice("second", vec![outcome(10_000, 1), outcome(20_000, 1)]),
        ]);
        assert_eq!(select_safe_default(&def, 100), Some(0));
    }

    #[test]
    fn test_zero_weight_outcomes_do_not_lower_the_floor() {
        let risky = choice("risky", vec![outcome(20_000, 10_000), outcome(0, 0)]);
        assert_eq!(choice_floor(&risky, 100), Some(200));

        let def = definition(vec![choice("safe", vec![outcome(10_000, 1)]), risky]);
        assert_eq!(select_safe_default(&def, 100), Some(1));
    }

    #[test]
    fn test_no_reachable_outcome_has_no_safe_default() {
        let def = definition(vec![choice("dead", vec![outcome(10_000, 0)]), choice("empty", vec![])]);
        assert_eq!(select_safe_default(&def, 100), None);
    }

    #[test]
    fn test_sampling_never_picks_zero_weight() {
        let outcomes = vec![outcome(0, 0), outcome(10_000, 1), outcome(0, 0)];
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..1_000 {
            assert_eq!(sample_outcome(&outcomes, &mut rng), Some(1));
        }
        assert_eq!(sample_outcome(&[outcome(1, 0)], &mut rng), None);
    }

    #[test]
    fn test_sampling_follows_weights() {
        let outcomes = vec![outcome(0, 9_000), outcome(0, 1_000)];
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let heavy = (0..10_000)
            .filter(|_| sample_outcome(&outcomes, &mut rng) == Some(0))
            .count();
        assert!((8_700..9_300).contains(&heavy), "got {heavy}");
    }

    #[test]
    fn test_chance_bounds_and_frequency() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!((0..1_000).all(|_| !roll_chance(FixedPoint::ZERO, &mut rng)));
        assert!((0..1_000).all(|_| roll_chance(FixedPoint::ONE, &mut rng)));

        let hits = (0..10_000)
            .filter(|_| roll_chance(FixedPoint::from_bp(2_500), &mut rng))
            .count();
        assert!((2_200..2_800).contains(&hits), "got {hits}");
    }
}
