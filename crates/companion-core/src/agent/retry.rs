//! Retry policy for failed generation attempts.
//!
//! Stateless: all decisions come from the attempt count, the configured
//! trial cap and the failure itself.

use companion_types::chat::TurnErrorKind;
use companion_types::llm::LlmError;

use crate::parser::ResponseParseError;

use super::prompt::correction_prompt;

/// Why a single generation attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error(transparent)]
    Generation(#[from] LlmError),

    #[error(transparent)]
    Parse(#[from] ResponseParseError),
}

impl AttemptError {
    pub fn kind(&self) -> TurnErrorKind {
        match self {
            AttemptError::Generation(e) if e.is_credential_error() => TurnErrorKind::ApiKeyNotDefined,
            AttemptError::Generation(_) => TurnErrorKind::UnknownError,
            AttemptError::Parse(_) => TurnErrorKind::ParseError,
        }
    }
}

pub struct RetryPolicy;

impl RetryPolicy {
    /// Whether another attempt should follow attempt number `attempt`
    /// (1-based). Credential failures never retry.
    pub fn should_retry(max_trial: u32, attempt: u32, error: &AttemptError) -> bool {
        if error.kind() == TurnErrorKind::ApiKeyNotDefined {
            return false;
        }
        attempt < max_trial
    }

    /// Correction note for the next attempt; only malformed output gets one.
    pub fn correction_for(error: &AttemptError) -> Option<String> {
        match error {
            AttemptError::Parse(e) => Some(correction_prompt(&e.to_string())),
            AttemptError::Generation(_) => None,
        }
    }
}
