//! Configuration types for the companion engine.
//!
//! `CompanionConfig` represents the top-level `config.toml`. Every field has a
//! default so a partial (or missing) file always yields a usable config.

use serde::{Deserialize, Serialize};

use crate::character::CharacterSetting;
use crate::llm::ProviderPreset;

/// Top-level configuration.
///
/// Loaded from `{data_dir}/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanionConfig {
    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(default)]
    pub conversation: ConversationConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub user: UserConfig,

    #[serde(default = "default_characters")]
    pub characters: Vec<CharacterSetting>,
}

fn default_characters() -> Vec<CharacterSetting> {
    vec![CharacterSetting::builtin()]
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            generator: GeneratorConfig::default(),
            conversation: ConversationConfig::default(),
            scheduler: SchedulerConfig::default(),
            user: UserConfig::default(),
            characters: default_characters(),
        }
    }
}

impl CompanionConfig {
    /// Look up a character by id (case-insensitive).
    pub fn character(&self, id: &str) -> Option<&CharacterSetting> {
        self.characters
            .iter()
            .find(|c| c.id.eq_ignore_ascii_case(id))
    }
}

/// Text generator selection and sampling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default)]
    pub provider: ProviderPreset,

    #[serde(default = "default_model")]
    pub model: String,

    /// Inline API key. Prefer `api_key_env` for anything shared.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key; defaults per preset.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Override the preset's base URL (required for `custom`).
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f64 {
    0.8
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: ProviderPreset::default(),
            model: default_model(),
            api_key: None,
            api_key_env: None,
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Turn pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Generation attempts per turn before surfacing a failure.
    #[serde(default = "default_max_trial")]
    pub max_trial: u32,

    /// Maximum messages kept in a character's in-memory history.
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Unsummarized message count that triggers background summarization.
    #[serde(default = "default_summary_threshold")]
    pub summary_threshold: usize,

    /// Minimum messages a summarization pass must cover.
    #[serde(default = "default_min_summarizable")]
    pub min_summarizable: usize,

    /// Most recent messages never folded into a summary.
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,

    /// Run profile extraction every N user turns (0 disables).
    #[serde(default = "default_profile_update_interval")]
    pub profile_update_interval: u32,

    /// Identical input within this window is dropped.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Wall-clock bound on each generator or tool call.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Maximum tool-calling rounds in the tool phase.
    #[serde(default = "default_tool_iteration_cap")]
    pub tool_iteration_cap: u32,

    /// Unsummarized messages included in the response prompt.
    #[serde(default = "default_context_messages")]
    pub context_messages: usize,

    /// Upper bound on the tool-result context blob, in characters.
    #[serde(default = "default_tool_context_chars")]
    pub tool_context_chars: usize,

    /// Lighter model for summarization; the main model when unset.
    #[serde(default)]
    pub summary_model: Option<String>,
}

fn default_max_trial() -> u32 {
    3
}

fn default_history_window() -> usize {
    100
}

fn default_summary_threshold() -> usize {
    40
}

fn default_min_summarizable() -> usize {
    10
}

fn default_keep_recent() -> usize {
    2
}

fn default_profile_update_interval() -> u32 {
    5
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_call_timeout_secs() -> u64 {
    30
}

fn default_tool_iteration_cap() -> u32 {
    5
}

fn default_context_messages() -> usize {
    20
}

fn default_tool_context_chars() -> usize {
    1200
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_trial: default_max_trial(),
            history_window: default_history_window(),
            summary_threshold: default_summary_threshold(),
            min_summarizable: default_min_summarizable(),
            keep_recent: default_keep_recent(),
            profile_update_interval: default_profile_update_interval(),
            debounce_ms: default_debounce_ms(),
            call_timeout_secs: default_call_timeout_secs(),
            tool_iteration_cap: default_tool_iteration_cap(),
            context_messages: default_context_messages(),
            tool_context_chars: default_tool_context_chars(),
            summary_model: None,
        }
    }
}

/// Unprompted-speech scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Seconds without user interaction before the idle trigger fires.
    #[serde(default = "default_idle_after_secs")]
    pub idle_after_secs: u64,

    /// Minimum seconds between two idle chit-chats.
    #[serde(default = "default_idle_cooldown_secs")]
    pub idle_cooldown_secs: u64,

    #[serde(default = "default_idle_priority")]
    pub idle_priority: u8,

    #[serde(default = "default_time_slots")]
    pub time_slots: Vec<TimeSlotConfig>,

    #[serde(default = "default_tray_priority")]
    pub tray_priority: u8,
}

fn default_true() -> bool {
    true
}

fn default_tick_secs() -> u64 {
    60
}

fn default_idle_after_secs() -> u64 {
    600
}

fn default_idle_cooldown_secs() -> u64 {
    1800
}

fn default_idle_priority() -> u8 {
    30
}

fn default_tray_priority() -> u8 {
    80
}

fn default_time_slots() -> Vec<TimeSlotConfig> {
    vec![
        TimeSlotConfig {
            at: "08:00".to_string(),
            message: "It's morning. Wish the user a good morning.".to_string(),
            priority: default_slot_priority(),
        },
        TimeSlotConfig {
            at: "12:30".to_string(),
            message: "It's lunch time. Remind the user to eat something.".to_string(),
            priority: default_slot_priority(),
        },
        TimeSlotConfig {
            at: "23:30".to_string(),
            message: "It's late at night. Gently suggest the user get some sleep.".to_string(),
            priority: default_slot_priority(),
        },
    ]
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: default_tick_secs(),
            idle_after_secs: default_idle_after_secs(),
            idle_cooldown_secs: default_idle_cooldown_secs(),
            idle_priority: default_idle_priority(),
            time_slots: default_time_slots(),
            tray_priority: default_tray_priority(),
        }
    }
}

/// A wall-clock slot at which the character says something once per day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSlotConfig {
    /// Local time as `HH:MM`.
    pub at: String,
    pub message: String,
    #[serde(default = "default_slot_priority")]
    pub priority: u8,
}

fn default_slot_priority() -> u8 {
    50
}

/// Information about the user known up front.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = CompanionConfig::default();
        assert_eq!(config.conversation.max_trial, 3);
        assert_eq!(config.conversation.summary_threshold, 40);
        assert_eq!(config.conversation.min_summarizable, 10);
        assert_eq!(config.conversation.keep_recent, 2);
        assert_eq!(config.conversation.profile_update_interval, 5);
        assert_eq!(config.conversation.debounce_ms, 300);
        assert_eq!(config.scheduler.tick_secs, 60);
        assert_eq!(config.characters.len(), 1);
        assert!(config.character("LUMI").is_some());
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config: CompanionConfig = toml::from_str("").unwrap();
        assert_eq!(config.generator.model, "gpt-4o-mini");
        assert_eq!(config.generator.provider, ProviderPreset::OpenAi);
        assert_eq!(config.scheduler.time_slots.len(), 3);
    }

    #[test]
    fn test_partial_toml() {
        let toml_str = r#"
[generator]
provider = "deepseek"
model = "deepseek-chat"

[conversation]
max_trial = 5

[scheduler]
enabled = false
time_slots = []

[[characters]]
id = "kai"
name = "Kai"
personality = "Stoic"
attitude_rules = [
    { threshold = 0, label = "wary" },
    { threshold = 60, label = "loyal" },
]

[[characters.topics]]
id = "stars"
prompt = "Talk about the stars."
weight = 3
"#;
        let config: CompanionConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.generator.provider, ProviderPreset::DeepSeek);
        assert_eq!(config.conversation.max_trial, 5);
        assert_eq!(config.conversation.history_window, 100);
        assert!(!config.scheduler.enabled);
        assert!(config.scheduler.time_slots.is_empty());
        assert_eq!(config.characters.len(), 1);

        let kai = config.character("kai").unwrap();
        assert_eq!(kai.background, "");
        assert_eq!(kai.topics[0].weight, 3);
        assert_eq!(kai.attitude_ruleset().rules()[0].label, "loyal");
    }
}
