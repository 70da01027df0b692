//! Relationship value objects: affection score and derived attitude.
//!
//! Every operation here is pure and returns a new value. The orchestrator is
//! the only component that replaces the current [`Relationship`] of a
//! character, and it does so only after the new value has been persisted.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lowest possible affection score.
pub const AFFECTION_MIN: u8 = 0;
/// Highest possible affection score.
pub const AFFECTION_MAX: u8 = 100;
/// Score a character starts with on first contact.
pub const AFFECTION_DEFAULT: u8 = 50;

/// Bounded warmth score of a character toward the user, always in `0..=100`.
///
/// Deserialization clamps out-of-range input instead of failing so that a
/// hand-edited store can never produce an invalid score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "u8")]
pub struct Affection(u8);

impl Affection {
    /// Create a score, clamping into `0..=100`.
    pub fn new(value: i64) -> Self {
        Self(value.clamp(AFFECTION_MIN as i64, AFFECTION_MAX as i64) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Return a new score shifted by `delta`, clamped into range.
    pub fn add(self, delta: i32) -> Self {
        Self::new(self.0 as i64 + delta as i64)
    }

    pub fn is_high(self) -> bool {
        self.0 >= 80
    }

    pub fn is_low(self) -> bool {
        self.0 <= 20
    }

    pub fn is_neutral(self) -> bool {
        (40..=60).contains(&self.0)
    }
}

impl Default for Affection {
    fn default() -> Self {
        Self(AFFECTION_DEFAULT)
    }
}

impl From<i64> for Affection {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl From<Affection> for u8 {
    fn from(affection: Affection) -> Self {
        affection.0
    }
}

impl fmt::Display for Affection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Qualitative label derived from affection (e.g. "friendly").
///
/// Labels are opaque: characters may define their own vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attitude(String);

impl Attitude {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Attitude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Attitude {
    fn from(label: &str) -> Self {
        Self(label.to_string())
    }
}

/// A single `(threshold, label)` entry of an attitude ruleset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttitudeRule {
    pub threshold: u8,
    pub label: String,
}

impl AttitudeRule {
    pub fn new(threshold: u8, label: impl Into<String>) -> Self {
        Self {
            threshold,
            label: label.into(),
        }
    }
}

/// Ordered ruleset mapping an affection score to an [`Attitude`].
///
/// Rules are kept sorted by descending threshold. The sort is stable, so
/// rules sharing a threshold keep their declared order and the first one
/// wins. The last rule acts as the unconditional floor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<AttitudeRule>", into = "Vec<AttitudeRule>")]
pub struct AttitudeRuleset {
    rules: Vec<AttitudeRule>,
}

impl AttitudeRuleset {
    /// Build a ruleset from rules in any order.
    ///
    /// An empty list yields the built-in three-tier ruleset.
    pub fn new(mut rules: Vec<AttitudeRule>) -> Self {
        if rules.is_empty() {
            return Self::default();
        }
        rules.sort_by(|a, b| b.threshold.cmp(&a.threshold));
        Self { rules }
    }

    pub fn rules(&self) -> &[AttitudeRule] {
        &self.rules
    }

    /// Resolve the attitude label for a score.
    pub fn resolve(&self, affection: Affection) -> Attitude {
        let value = affection.value();
        self.rules
            .iter()
            .find(|rule| rule.threshold <= value)
            .or_else(|| self.rules.last())
            .map(|rule| Attitude::new(rule.label.clone()))
            .unwrap_or_else(|| Attitude::new("neutral"))
    }
}

impl Default for AttitudeRuleset {
    fn default() -> Self {
        Self {
            rules: vec![
                AttitudeRule::new(80, "friendly"),
                AttitudeRule::new(50, "neutral"),
                AttitudeRule::new(0, "hostile"),
            ],
        }
    }
}

impl From<Vec<AttitudeRule>> for AttitudeRuleset {
    fn from(rules: Vec<AttitudeRule>) -> Self {
        Self::new(rules)
    }
}

impl From<AttitudeRuleset> for Vec<AttitudeRule> {
    fn from(ruleset: AttitudeRuleset) -> Self {
        ruleset.rules
    }
}

/// Relationship between the user and one character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub character_id: String,
    pub affection: Affection,
    pub attitude: Attitude,
    pub updated_at: DateTime<Utc>,
}

impl Relationship {
    /// The relationship a character starts with on first contact.
    pub fn initial(character_id: impl Into<String>, ruleset: &AttitudeRuleset) -> Self {
        let affection = Affection::default();
        Self {
            character_id: character_id.into(),
            affection,
            attitude: ruleset.resolve(affection),
            updated_at: Utc::now(),
        }
    }

    /// Produce a new relationship with the affection shifted by `delta`.
    pub fn update(&self, delta: i32, new_attitude: Attitude) -> Self {
        Self {
            character_id: self.character_id.clone(),
            affection: self.affection.add(delta),
            attitude: new_attitude,
            updated_at: Utc::now(),
        }
    }

    /// Shift affection by `delta` and re-derive the attitude from `ruleset`.
    pub fn apply_delta(&self, delta: i32, ruleset: &AttitudeRuleset) -> Self {
        let attitude = ruleset.resolve(self.affection.add(delta));
        self.update(delta, attitude)
    }
}
