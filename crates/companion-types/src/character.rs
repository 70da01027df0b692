//! Character settings, user profile, and chit-chat topics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::relationship::{AttitudeRule, AttitudeRuleset};

/// Full description of a character as configured by the user.
///
/// Only [`CharacterBrief`] is ever sent to the generator; the remaining
/// fields drive the UI and the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterSetting {
    pub id: String,
    pub name: String,
    pub personality: String,
    #[serde(default)]
    pub background: String,
    #[serde(default)]
    pub appearance: Option<String>,
    #[serde(default)]
    pub speech_style: Option<String>,
    /// Character-specific attitude thresholds; the built-in three tiers apply
    /// when absent.
    #[serde(default)]
    pub attitude_rules: Option<Vec<AttitudeRule>>,
    #[serde(default)]
    pub topics: Vec<Topic>,
}

impl CharacterSetting {
    /// The data-minimized view of this character used in prompts.
    pub fn brief(&self) -> CharacterBrief {
        CharacterBrief {
            name: self.name.clone(),
            personality: self.personality.clone(),
            background: self.background.clone(),
        }
    }

    pub fn attitude_ruleset(&self) -> AttitudeRuleset {
        match &self.attitude_rules {
            Some(rules) => AttitudeRuleset::new(rules.clone()),
            None => AttitudeRuleset::default(),
        }
    }

    /// The character shipped with a fresh install.
    pub fn builtin() -> Self {
        Self {
            id: "lumi".to_string(),
            name: "Lumi".to_string(),
            personality: "Curious, playful and a little shy. Warms up quickly to people who are kind, \
                          gets sulky when ignored."
                .to_string(),
            background: "A small desktop spirit who lives in the corner of the screen and keeps \
                         the user company while they work."
                .to_string(),
            appearance: Some("Pastel hair, oversized hoodie".to_string()),
            speech_style: Some("Casual, short sentences".to_string()),
            attitude_rules: None,
            topics: vec![
                Topic::new("music", "Ask the user what music they have been listening to lately."),
                Topic::new("break", "Suggest the user take a short stretch break.")
                    .with_weight(2),
                Topic::new("secret", "Share a small secret about yourself.")
                    .with_min_affection(70),
            ],
        }
    }
}

/// Fields of a character the generator needs: name, personality, background.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterBrief {
    pub name: String,
    pub personality: String,
    pub background: String,
}

/// Facts the characters know about the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Maximum number of facts kept in a profile; oldest facts are dropped first.
pub const MAX_PROFILE_FACTS: usize = 50;

/// Incremental change to a [`UserProfile`] produced by profile extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub facts: Vec<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.nickname.is_none() && self.facts.is_empty()
    }
}

impl UserProfile {
    /// Merge an update, skipping duplicate facts. Returns whether anything
    /// changed.
    pub fn merge(&mut self, update: &ProfileUpdate) -> bool {
        let mut changed = false;

        if let Some(nickname) = update.nickname.as_deref().map(str::trim) {
            if !nickname.is_empty() && self.nickname.as_deref() != Some(nickname) {
                self.nickname = Some(nickname.to_string());
                changed = true;
            }
        }

        for fact in &update.facts {
            let fact = fact.trim();
            if fact.is_empty() || self.facts.iter().any(|f| f.eq_ignore_ascii_case(fact)) {
                continue;
            }
            self.facts.push(fact.to_string());
            changed = true;
        }

        if self.facts.len() > MAX_PROFILE_FACTS {
            let overflow = self.facts.len() - MAX_PROFILE_FACTS;
            self.facts.drain(..overflow);
        }

        if changed {
            self.updated_at = Some(Utc::now());
        }
        changed
    }

    /// Name the characters should use when addressing the user.
    pub fn address(&self) -> Option<&str> {
        self.nickname.as_deref().or(self.display_name.as_deref())
    }
}

/// Something a character can bring up unprompted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub prompt: String,
    #[serde(default = "default_topic_weight")]
    pub weight: u32,
    /// Minimum affection required before the topic can come up.
    #[serde(default)]
    pub min_affection: u8,
    #[serde(default = "default_topic_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_topic_weight() -> u32 {
    1
}

fn default_topic_cooldown_secs() -> u64 {
    3600
}

impl Topic {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            weight: default_topic_weight(),
            min_affection: 0,
            cooldown_secs: default_topic_cooldown_secs(),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_min_affection(mut self, min_affection: u8) -> Self {
        self.min_affection = min_affection;
        self
    }

    pub fn with_cooldown_secs(mut self, cooldown_secs: u64) -> Self {
        self.cooldown_secs = cooldown_secs;
        self
    }
}
