//! Events published by a conversation orchestrator.
//!
//! Stream lifecycle events obey a fixed ordering per stream attempt:
//! `StreamStart` precedes any `EmoticonParsed` or `Chunk`, and exactly one of
//! `StreamComplete` / `StreamError` closes the attempt.

use serde::{Deserialize, Serialize};

/// Event emitted by an orchestrator to its subscribers (UI, loggers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompanionEvent {
    /// A generation stream was opened.
    StreamStart { character_id: String },

    /// The expression tag was recognized before the message finished.
    EmoticonParsed {
        character_id: String,
        emoticon: String,
    },

    /// A fragment of the character's message body.
    Chunk { character_id: String, text: String },

    /// The stream finished and its output parsed successfully.
    StreamComplete { character_id: String },

    /// The stream attempt failed or was cancelled.
    StreamError { character_id: String, error: String },

    /// A persisted relationship change.
    RelationshipChanged {
        character_id: String,
        affection: u8,
        attitude: String,
        delta: i32,
    },

    /// A tool was invoked during the tool phase of a turn.
    ToolInvoked {
        character_id: String,
        tool: String,
        success: bool,
    },

    /// Background summarization condensed part of the history.
    SummaryCreated {
        character_id: String,
        message_count: u32,
    },

    /// A turn reached its end state.
    TurnCompleted {
        character_id: String,
        success: bool,
        trials: u32,
    },

    /// The scheduler produced an unprompted turn.
    TriggerFired {
        character_id: String,
        trigger_id: String,
        priority: u8,
    },
}

impl CompanionEvent {
    pub fn character_id(&self) -> &str {
        match self {
            CompanionEvent::StreamStart { character_id }
            | CompanionEvent::EmoticonParsed { character_id, .. }
            | CompanionEvent::Chunk { character_id, .. }
            | CompanionEvent::StreamComplete { character_id }
            | CompanionEvent::StreamError { character_id, .. }
            | CompanionEvent::RelationshipChanged { character_id, .. }
            | CompanionEvent::ToolInvoked { character_id, .. }
            | CompanionEvent::SummaryCreated { character_id, .. }
            | CompanionEvent::TurnCompleted { character_id, .. }
            | CompanionEvent::TriggerFired { character_id, .. } => character_id,
        }
    }

    /// True for `StreamComplete` and `StreamError`.
    pub fn is_stream_terminal(&self) -> bool {
        matches!(
            self,
            CompanionEvent::StreamComplete { .. } | CompanionEvent::StreamError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let event = CompanionEvent::EmoticonParsed {
            character_id: "lumi".into(),
            emoticon: "happy".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "emoticon_parsed");
        assert_eq!(json["emoticon"], "happy");
    }

    #[test]
    fn terminal_classification() {
        let done = CompanionEvent::StreamComplete {
            character_id: "lumi".into(),
        };
        let chunk = CompanionEvent::Chunk {
            character_id: "lumi".into(),
            text: "hi".into(),
        };
        assert!(done.is_stream_terminal());
        assert!(!chunk.is_stream_terminal());
        assert_eq!(chunk.character_id(), "lumi");
    }
}
