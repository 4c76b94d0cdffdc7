//! # Ambient Event Definitions
//!
//! Authored in TOML, one `[[event]]` table per definition:
//!
//! ```toml
//! [[event]]
//! key = "golden_hour"
//! priority = 10
//! chance = 0.25
//! cooldown_minutes = 120
//! duration_minutes = 30
//! days = [5, 6]                           # 0 = Monday
//! time_ranges = ["17:00-19:30", "23:00-01:00"]
//! start_message = "The water glows gold."
//!
//! [event.effects]
//! sell_multiplier = 1.5
//! ```
//!
//! Time ranges are inclusive at minute resolution. A range whose start is
//! after its end wraps midnight.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{Datelike, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// One ambient event as authored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AmbientDefinition {
    /// Unique key.
    pub key: String,
    /// Higher is visited first.
    #[serde(default)]
    pub priority: i32,
    /// Trigger probability per eligible tick. `>= 1.0` always fires.
    #[serde(default)]
    pub chance: f64,
    /// Minimum time between two activations.
    #[serde(default)]
    pub cooldown_minutes: u64,
    /// How long an activation lasts.
    #[serde(default = "default_duration")]
    pub duration_minutes: u64,
    /// Weekdays the event may start on (0 = Monday). Empty means every day.
    #[serde(default)]
    pub days: Vec<u8>,
    /// `"HH:MM-HH:MM"` windows. Empty means all day.
    #[serde(default)]
    pub time_ranges: Vec<String>,
    /// Named modifiers in force while active.
    #[serde(default)]
    pub effects: BTreeMap<String, f64>,
    /// Announcement when the event starts.
    #[serde(default)]
    pub start_message: Option<String>,
    /// Announcement when the event ends.
    #[serde(default)]
    pub end_message: Option<String>,
}

fn default_duration() -> u64 {
    30
}

impl AmbientDefinition {
    /// Cooldown as a duration.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_minutes.saturating_mul(60))
    }

    /// Activation length as a duration.
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_minutes.saturating_mul(60))
    }

    /// Checks the definition and compiles its windows.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn compile(&self) -> Result<Window, String> {
        if self.key.is_empty() {
            return Err("empty key".into());
        }
        if !self.chance.is_finite() || self.chance < 0.0 {
            return Err(format!("chance {} is not a probability", self.chance));
        }
        if self.duration_minutes == 0 {
            return Err("duration_minutes must be > 0".into());
        }
        if let Some(day) = self.days.iter().find(|day| **day > 6) {
            return Err(format!("day {day} is outside 0..=6"));
        }
        let ranges = self
            .time_ranges
            .iter()
            .map(|range| TimeRange::parse(range))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Window { days: self.days.clone(), ranges })
    }
}

/// Inclusive time-of-day range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeRange {
    start: NaiveTime,
    end: NaiveTime,
}

impl TimeRange {
    /// Parses `"HH:MM-HH:MM"`.
    ///
    /// # Errors
    ///
    /// Returns a description of the malformed part.
    pub fn parse(text: &str) -> Result<Self, String> {
        let (start, end) = text
            .split_once('-')
            .ok_or_else(|| format!("time range {text:?} is not HH:MM-HH:MM"))?;
        let parse = |part: &str| {
            NaiveTime::parse_from_str(part.trim(), "%H:%M").map_err(|e| format!("time range {text:?}: {e}"))
        };
        Ok(Self { start: parse(start)?, end: parse(end)? })
    }

    /// Returns true if `time`, truncated to the minute, falls in the range.
    #[must_use]
    pub fn contains(&self, time: NaiveTime) -> bool {
        let minute = time.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(time);
        if self.start <= self.end {
            self.start <= minute && minute <= self.end
        } else {
            minute >= self.start || minute <= self.end
        }
    }
}

/// Compiled day and time-of-day window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Window {
    days: Vec<u8>,
    ranges: Vec<TimeRange>,
}

impl Window {
    /// Returns true if `now` is inside the window.
    #[must_use]
    pub fn contains(&self, now: NaiveDateTime) -> bool {
        let weekday = u8::try_from(now.weekday().num_days_from_monday()).unwrap_or(u8::MAX);
        if !self.days.is_empty() && !self.days.contains(&weekday) {
            return false;
        }
        self.ranges.is_empty() || self.ranges.iter().any(|range| range.contains(now.time()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        // 2024-01-01 is a Monday.
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(hour, minute, second)
            .unwrap()
    }

    fn definition(days: Vec<u8>, time_ranges: &[&str]) -> AmbientDefinition {
        AmbientDefinition {
            key: "test".into(),
            priority: 0,
            chance: 1.0,
            cooldown_minutes: 0,
            duration_minutes: 30,
            days,
            time_ranges: time_ranges.iter().map(ToString::to_string).collect(),
            effects: BTreeMap::new(),
            start_message: None,
            end_message: None,
        }
    }

    #[test]
    fn test_range_is_inclusive_at_minute_resolution() {
        let window = definition(vec![], &["17:00-18:30"]).compile().unwrap();
        assert!(window.contains(at(1, 17, 0, 0)));
        assert!(window.contains(at(1, 18, 30, 59)));
        assert!(!window.contains(at(1, 18, 31, 0)));
        assert!(!window.contains(at(1, 16, 59, 59)));
    }

    #[test]
    fn test_range_wraps_midnight() {
        let window = definition(vec![], &["23:00-01:00"]).compile().unwrap();
        assert!(window.contains(at(1, 23, 30, 0)));
        assert!(window.contains(at(2, 0, 45, 0)));
        assert!(!window.contains(at(2, 1, 1, 0)));
        assert!(!window.contains(at(1, 12, 0, 0)));
    }

    #[test]
    fn test_days_filter_uses_monday_zero() {
        let window = definition(vec![5, 6], &[]).compile().unwrap();
        assert!(!window.contains(at(1, 12, 0, 0)));
        assert!(window.contains(at(6, 12, 0, 0)));
        assert!(window.contains(at(7, 12, 0, 0)));
    }

    #[test]
    fn test_invalid_definitions_do_not_compile() {
        assert!(definition(vec![7], &[]).compile().is_err());
        assert!(definition(vec![], &["25:00-26:00"]).compile().is_err());
        assert!(definition(vec![], &["noon"]).compile().is_err());

        let mut bad_chance = definition(vec![], &[]);
        bad_chance.chance = f64::NAN;
        assert!(bad_chance.compile().is_err());

        let mut no_duration = definition(vec![], &[]);
        no_duration.duration_minutes = 0;
        assert!(no_duration.compile().is_err());
    }
}
