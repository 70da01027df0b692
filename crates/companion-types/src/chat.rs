//! Chat message, summary, and turn-result types.
//!
//! A character's history is an ordered log of [`ChatMessage`]s. Messages are
//! immutable once created; only the containing history grows or evicts.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::relationship::Relationship;

/// Discriminant of a [`MessageBody`], used as the persisted `kind` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    System,
    Character,
    Summary,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::User => write!(f, "user"),
            MessageKind::System => write!(f, "system"),
            MessageKind::Character => write!(f, "character"),
            MessageKind::Summary => write!(f, "summary"),
        }
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(MessageKind::User),
            "system" => Ok(MessageKind::System),
            "character" => Ok(MessageKind::Character),
            "summary" => Ok(MessageKind::Summary),
            other => Err(format!("invalid message kind: '{other}'")),
        }
    }
}

/// Per-kind payload of a chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    /// Typed by the user.
    User,
    /// Synthetic event text (triggers, greetings, farewells).
    System,
    /// Generated by the character, with the fields parsed from the generation.
    Character { emoticon: String, affection_delta: i32 },
    /// Summary marker covering every message up to and including `covers_until`.
    Summary {
        covers_until: Option<Uuid>,
        message_count: u32,
    },
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::User => MessageKind::User,
            MessageBody::System => MessageKind::System,
            MessageBody::Character { .. } => MessageKind::Character,
            MessageBody::Summary { .. } => MessageKind::Summary,
        }
    }
}

/// A single entry in a character's chat history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub character_id: String,
    #[serde(flatten)]
    pub body: MessageBody,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    fn build(character_id: &str, body: MessageBody, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            character_id: character_id.to_string(),
            body,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn user(character_id: &str, content: impl Into<String>) -> Self {
        Self::build(character_id, MessageBody::User, content)
    }

    pub fn system(character_id: &str, content: impl Into<String>) -> Self {
        Self::build(character_id, MessageBody::System, content)
    }

    pub fn character(
        character_id: &str,
        emoticon: impl Into<String>,
        affection_delta: i32,
        content: impl Into<String>,
    ) -> Self {
        Self::build(
            character_id,
            MessageBody::Character {
                emoticon: emoticon.into(),
                affection_delta,
            },
            content,
        )
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    pub fn is_summary(&self) -> bool {
        matches!(self.body, MessageBody::Summary { .. })
    }

    /// True for messages exchanged between user and character (not system
    /// events, not summary markers).
    pub fn is_raw(&self) -> bool {
        matches!(self.body, MessageBody::User | MessageBody::Character { .. })
    }
}

/// Persisted rolling summary of a character's older history.
///
/// Only the latest summary is active; `covers_until` anchors it to the last
/// message it condensed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub id: Uuid,
    pub character_id: String,
    pub content: String,
    pub covers_until: Option<Uuid>,
    pub message_count: u32,
    pub created_at: DateTime<Utc>,
}

impl ContextSummary {
    pub fn new(
        character_id: &str,
        content: impl Into<String>,
        covers_until: Option<Uuid>,
        message_count: u32,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            character_id: character_id.to_string(),
            content: content.into(),
            covers_until,
            message_count,
            created_at: Utc::now(),
        }
    }

    /// The in-history marker representing this summary.
    pub fn to_marker(&self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            character_id: self.character_id.clone(),
            body: MessageBody::Summary {
                covers_until: self.covers_until,
                message_count: self.message_count,
            },
            content: self.content.clone(),
            created_at: self.created_at,
        }
    }
}

/// Typed failure category of a turn, serialized as the camelCase tag the UI
/// layer switches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TurnErrorKind {
    ApiKeyNotDefined,
    ParseError,
    UnknownError,
}

impl fmt::Display for TurnErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnErrorKind::ApiKeyNotDefined => write!(f, "apiKeyNotDefined"),
            TurnErrorKind::ParseError => write!(f, "parseError"),
            TurnErrorKind::UnknownError => write!(f, "unknownError"),
        }
    }
}

/// Terminal failure attached to a fallback response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnFailure {
    pub error_type: TurnErrorKind,
    pub trials: u32,
    pub detail: String,
}

/// Neutral apology shown when a turn fails terminally.
pub const FALLBACK_MESSAGE: &str =
    "Sorry, I lost my train of thought for a moment. Could you say that again?";
/// Expression tag used for fallback responses.
pub const NEUTRAL_EMOTICON: &str = "neutral";

/// The outcome of a turn as returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterResponse {
    pub character_id: String,
    pub emoticon: String,
    pub affection_delta: i32,
    pub message: String,
    pub relationship: Relationship,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<TurnFailure>,
}

impl CharacterResponse {
    /// Neutral-affect response for a failed turn; the relationship is returned
    /// unchanged.
    pub fn fallback(relationship: Relationship, failure: TurnFailure) -> Self {
        Self {
            character_id: relationship.character_id.clone(),
            emoticon: NEUTRAL_EMOTICON.to_string(),
            affection_delta: 0,
            message: FALLBACK_MESSAGE.to_string(),
            relationship,
            failure: Some(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationship::AttitudeRuleset;

    #[test]
    fn message_kind_roundtrip() {
        for kind in [
            MessageKind::User,
            MessageKind::System,
            MessageKind::Character,
            MessageKind::Summary,
        ] {
            let parsed: MessageKind = kind.to_string().parse().unwrap();
            assert_eq!(kind, parsed);
        }
    }

    #[test]
    fn raw_excludes_system_and_summary() {
        let summary = ContextSummary::new("lumi", "they talked", None, 4);
        assert!(ChatMessage::user("lumi", "hi").is_raw());
        assert!(ChatMessage::character("lumi", "happy", 1, "hey").is_raw());
        assert!(!ChatMessage::system("lumi", "idle").is_raw());
        assert!(!summary.to_marker().is_raw());
        assert!(summary.to_marker().is_summary());
    }

    #[test]
    fn turn_error_kind_serializes_camel_case() {
        let json = serde_json::to_string(&TurnErrorKind::ApiKeyNotDefined).unwrap();
        assert_eq!(json, "\"apiKeyNotDefined\"");
        assert_eq!(TurnErrorKind::ParseError.to_string(), "parseError");
    }

    #[test]
    fn fallback_keeps_relationship() {
        let rel = Relationship::initial("lumi", &AttitudeRuleset::default());
        let resp = CharacterResponse::fallback(
            rel.clone(),
            TurnFailure {
                error_type: TurnErrorKind::ParseError,
                trials: 3,
                detail: "no message".into(),
            },
        );
        assert!(!resp.is_success());
        assert_eq!(resp.affection_delta, 0);
        assert_eq!(resp.emoticon, NEUTRAL_EMOTICON);
        assert_eq!(resp.relationship, rel);
    }

    #[test]
    fn message_body_flattens_into_json() {
        let msg = ChatMessage::character("lumi", "wink", -2, "hmm");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["kind"], "character");
        assert_eq!(value["affection_delta"], -2);
    }
}
