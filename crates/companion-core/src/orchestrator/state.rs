//! Per-turn state machine data.
//!
//! ```text
//! Start ──► Tool ──► Response ──► Persist ──► End
//!   │        ▲ │        ▲ │                    ▲
//!   │        └─┘        └─┘ (retry)            │
//!   └──────────────────►┘ └────────────────────┘ (terminal failure, cancel)
//! ```
//!
//! A `TurnState` is created at turn start and dropped when the turn ends;
//! it never outlives its turn.

use companion_types::chat::{CharacterResponse, TurnErrorKind, TurnFailure};
use companion_types::relationship::Relationship;

use crate::agent::{AttemptError, TurnInput};
use crate::parser::ParsedResponse;
use crate::tool::ToolSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Start,
    Tool,
    Response,
    Persist,
    End,
}

/// Ephemeral data of one orchestrated turn.
#[derive(Debug)]
pub struct TurnState {
    pub input: TurnInput,
    /// Relationship as of turn start.
    pub relationship: Relationship,
    pub tool_session: Option<ToolSession>,
    pub tool_context: Option<String>,
    pub trials: u32,
    pub correction: Option<String>,
    pub parsed: Option<ParsedResponse>,
    pub next_relationship: Option<Relationship>,
    pub last_error: Option<AttemptError>,
    pub cancelled: bool,
    pub persisted: bool,
}

impl TurnState {
    pub fn new(input: TurnInput, relationship: Relationship) -> Self {
        Self {
            input,
            relationship,
            tool_session: None,
            tool_context: None,
            trials: 0,
            correction: None,
            parsed: None,
            next_relationship: None,
            last_error: None,
            cancelled: false,
            persisted: false,
        }
    }

    /// Final response once the machine reached `End` without cancellation.
    ///
    /// A turn that did not persist yields the neutral fallback with the
    /// relationship unchanged.
    pub fn into_response(self) -> CharacterResponse {
        match (self.persisted, self.parsed, self.next_relationship) {
            (true, Some(parsed), Some(relationship)) => CharacterResponse {
                character_id: relationship.character_id.clone(),
                emoticon: parsed.emoticon,
                affection_delta: parsed.affection_delta,
                message: parsed.message,
                relationship,
                failure: None,
            },
            _ => {
                let (error_type, detail) = match &self.last_error {
                    Some(error) => (error.kind(), error.to_string()),
                    None => (TurnErrorKind::UnknownError, "turn ended without a reply".to_string()),
                };
                CharacterResponse::fallback(
                    self.relationship,
                    TurnFailure {
                        error_type,
                        trials: self.trials,
                        detail,
                    },
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ResponseParseError;
    use companion_types::chat::FALLBACK_MESSAGE;
    use companion_types::relationship::AttitudeRuleset;

    fn state() -> TurnState {
        let rel = Relationship::initial("lumi", &AttitudeRuleset::default());
        TurnState::new(TurnInput::User("hi".into()), rel)
    }

    #[test]
    fn persisted_turn_yields_parsed_reply() {
        let mut state = state();
        let next = state.relationship.apply_delta(5, &AttitudeRuleset::default());
        state.parsed = Some(ParsedResponse {
            emoticon: "happy".into(),
            affection_delta: 5,
            message: "Hello!".into(),
        });
        state.next_relationship = Some(next);
        state.persisted = true;

        let response = state.into_response();
        assert!(response.is_success());
        assert_eq!(response.relationship.affection.value(), 55);
        assert_eq!(response.message, "Hello!");
    }

    #[test]
    fn unpersisted_turn_falls_back_with_typed_error() {
        let mut state = state();
        state.trials = 3;
        state.parsed = Some(ParsedResponse {
            emoticon: "happy".into(),
            affection_delta: 5,
            message: "Hello!".into(),
        });
        state.last_error = Some(AttemptError::Parse(ResponseParseError::Incomplete {
            missing: vec!["message"],
        }));

        let response = state.into_response();
        let failure = response.failure.clone().unwrap();
        assert_eq!(failure.error_type, TurnErrorKind::ParseError);
        assert_eq!(failure.trials, 3);
        assert_eq!(response.message, FALLBACK_MESSAGE);
        assert_eq!(response.relationship.affection.value(), 50);
    }
}
