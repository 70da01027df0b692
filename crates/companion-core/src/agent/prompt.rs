//! Prompt assembly for the response agent.
//!
//! The system prompt is split into XML-tagged sections so the generator can
//! tell the character, the user, the relationship and the retrieved context
//! apart:
//!
//! ```text
//! <character>Name / Personality / Background</character>
//! <user>How to address the user, known facts</user>
//! <relationship>Affection and attitude</relationship>
//! <conversation_summary>Rolling summary of older history</conversation_summary>
//! <tool_results>Facts gathered during the tool phase</tool_results>
//! <format>The three-field answer format</format>
//! ```
//!
//! Only name, personality and background leave the character setting.

use chrono::{DateTime, Local, Timelike};
use companion_types::character::{CharacterBrief, UserProfile};
use companion_types::chat::{ChatMessage, MessageBody};
use companion_types::llm::Message;
use companion_types::relationship::Relationship;

/// Coarse part of the day for an hour in `0..24`.
pub fn day_period(hour: u32) -> &'static str {
    match hour {
        5..=11 => "morning",
        12..=16 => "afternoon",
        17..=21 => "evening",
        _ => "night",
    }
}

/// What triggered the turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnInput {
    /// Typed by the user.
    User(String),
    /// Synthetic event: greeting, farewell, scheduler trigger.
    System(String),
}

impl TurnInput {
    pub fn text(&self) -> &str {
        match self {
            TurnInput::User(text) | TurnInput::System(text) => text,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, TurnInput::System(_))
    }

    /// The history entry this input becomes once the turn is persisted.
    pub fn to_message(&self, character_id: &str) -> ChatMessage {
        match self {
            TurnInput::User(text) => ChatMessage::user(character_id, text.clone()),
            TurnInput::System(text) => ChatMessage::system(character_id, text.clone()),
        }
    }

    fn as_prompt_message(&self) -> Message {
        match self {
            TurnInput::User(text) => Message::user(text.clone()),
            TurnInput::System(text) => Message::user(system_event(text)),
        }
    }
}

/// Everything the response agent needs for one generation attempt.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub character: CharacterBrief,
    pub user: UserProfile,
    pub relationship: Relationship,
    pub summary: Option<String>,
    /// Unsummarized history as generator messages, oldest first.
    pub history: Vec<Message>,
    pub tool_results: Option<String>,
    pub input: TurnInput,
    /// Set on retries after malformed output.
    pub correction: Option<String>,
    pub now: DateTime<Local>,
}

impl ResponseContext {
    pub fn system_prompt(&self) -> String {
        let mut sections = Vec::with_capacity(7);

        let brief = &self.character;
        let mut character = format!(
            "Name: {}\nPersonality: {}",
            brief.name.trim(),
            brief.personality.trim()
        );
        if !brief.background.trim().is_empty() {
            character.push_str(&format!("\nBackground: {}", brief.background.trim()));
        }
        sections.push(format!("<character>\n{character}\n</character>"));

        let mut user = Vec::new();
        if let Some(name) = self.user.address() {
            user.push(format!("Call the user {name}."));
        }
        if !self.user.facts.is_empty() {
            user.push("Things you know about the user:".to_string());
            user.extend(self.user.facts.iter().map(|f| format!("- {f}")));
        }
        if !user.is_empty() {
            sections.push(format!("<user>\n{}\n</user>", user.join("\n")));
        }

        sections.push(format!(
            "<relationship>\nAffection toward the user: {}/100\nCurrent attitude: {}\n</relationship>",
            self.relationship.affection, self.relationship.attitude
        ));

        if let Some(summary) = self.summary.as_deref().filter(|s| !s.trim().is_empty()) {
            sections.push(format!(
                "<conversation_summary>\n{}\n</conversation_summary>",
                summary.trim()
            ));
        }

        if let Some(results) = self.tool_results.as_deref() {
            sections.push(format!(
                "<tool_results>\nUse these facts if they help. Do not mention tools.\n{results}\n</tool_results>"
            ));
        }

        sections.push(format!(
            "<situation>\nIt is {} on {}, {}.\n</situation>",
            self.now.format("%H:%M"),
            self.now.format("%A"),
            day_period(self.now.hour())
        ));

        sections.push(format!(
            "<instructions>\n\
             You are {}. Stay in character and let your attitude color every reply.\n\
             Messages wrapped in [event] are things that happened, not words the user said.\n\
             </instructions>",
            brief.name.trim()
        ));
        sections.push(FORMAT_INSTRUCTIONS.to_string());

        sections.join("\n\n")
    }

    /// History, then the current input, then the correction note if any.
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = self.history.clone();
        messages.push(self.input.as_prompt_message());
        if let Some(correction) = &self.correction {
            messages.push(Message::user(correction.clone()));
        }
        messages
    }
}

const FORMAT_INSTRUCTIONS: &str = "<format>\n\
Answer in exactly this layout, fields in this order:\n\
EMOTICON: <one word for your facial expression, e.g. happy, sad, angry, shy, surprised, neutral>\n\
AFFECTION: <integer from -10 to 10, how this exchange changed your feelings toward the user>\n\
MESSAGE:\n\
<your reply to the user>\n\
</format>";

/// Follow-up sent after output that could not be parsed.
pub fn correction_prompt(reason: &str) -> String {
    format!(
        "[event] Your previous answer could not be read ({reason}). \
         Answer again using exactly the EMOTICON / AFFECTION / MESSAGE layout."
    )
}

fn system_event(text: &str) -> String {
    format!("[event] {text}")
}

/// Convert stored history into generator messages.
///
/// Summary markers are skipped; the summary goes into the system prompt.
pub fn history_messages<'a>(history: impl IntoIterator<Item = &'a ChatMessage>) -> Vec<Message> {
    history
        .into_iter()
        .filter_map(|m| match &m.body {
            MessageBody::User => Some(Message::user(m.content.clone())),
            MessageBody::System => Some(Message::user(system_event(&m.content))),
            MessageBody::Character { .. } => Some(Message::assistant(m.content.clone())),
            MessageBody::Summary { .. } => None,
        })
        .collect()
}
