//! The turn state machine: one handler per phase.
//!
//! Only `on_persist` writes to the store. The exchange and the relationship
//! go out in one atomic write before the in-memory session changes, so a
//! failed write leaves memory and disk agreeing.

use std::time::Duration;

use chrono::Local;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use companion_types::chat::{CharacterResponse, ChatMessage};
use companion_types::event::CompanionEvent;
use companion_types::llm::LlmError;

use crate::agent::prompt::history_messages;
use crate::agent::{AttemptError, FragmentStream, ResponseContext, RetryPolicy, TurnInput};
use crate::history::CompanionStore;
use crate::parser::{ParseEvent, ParsedResponse, ResponseParser};
use crate::tool::ToolStep;
use crate::tool::builtin::UPDATE_USER_PROFILE;

use super::state::{TurnPhase, TurnState};
use super::{ConversationOrchestrator, OrchestratorError, Session};

/// Messages of recent context handed to the tool phase.
const TOOL_CONTEXT_MESSAGES: usize = 6;

/// Result of one generation attempt.
enum Attempt {
    Parsed(ParsedResponse),
    Failed(AttemptError),
    Cancelled,
}

impl<S: CompanionStore> ConversationOrchestrator<S> {
    pub(super) async fn run_turn(
        &self,
        session: &mut Session,
        input: TurnInput,
    ) -> Result<CharacterResponse, OrchestratorError> {
        let span = info_span!(
            "turn",
            character_id = %self.character.id,
            system = input.is_system(),
        );
        async move {
            let cancel = self.begin_turn();
            self.await_summarization(&mut session.history).await;
            self.refresh_profile(session).await;

            let mut state = TurnState::new(input, session.relationship.clone());
            let mut phase = TurnPhase::Start;
            let outcome = loop {
                debug!(?phase, "turn phase");
                phase = match phase {
                    TurnPhase::Start => self.on_start(&mut state, session),
                    TurnPhase::Tool => self.on_tool(&mut state, session, &cancel).await,
                    TurnPhase::Response => self.on_response(&mut state, session, &cancel).await,
                    TurnPhase::Persist => match self.on_persist(&mut state, session).await {
                        Ok(next) => next,
                        Err(e) => break Err(e),
                    },
                    TurnPhase::End => break Ok(()),
                };
            };
            self.end_turn();

            let success = outcome.is_ok() && state.persisted;
            self.events.publish(CompanionEvent::TurnCompleted {
                character_id: self.character.id.clone(),
                success,
                trials: state.trials,
            });

            if let Err(e) = outcome {
                warn!(error = %e, "turn failed to persist");
                return Err(e);
            }
            if state.cancelled {
                debug!("turn cancelled");
                return Err(OrchestratorError::Cancelled);
            }
            if state.persisted {
                self.spawn_housekeeping(session);
            } else if let Some(error) = &state.last_error {
                warn!(trials = state.trials, error = %error, "turn ended with fallback reply");
            }
            Ok(state.into_response())
        }
        .instrument(span)
        .await
    }

    fn on_start(&self, state: &mut TurnState, session: &Session) -> TurnPhase {
        let decision = self
            .dispatcher
            .decide(state.input.text(), state.input.is_system());
        debug!(?decision, "tool decision");
        if !decision.needs_tools() {
            return TurnPhase::Response;
        }

        let unsummarized = session.history.unsummarized();
        let tail = &unsummarized[unsummarized.len().saturating_sub(TOOL_CONTEXT_MESSAGES)..];
        let recent = history_messages(tail.iter().copied());
        state.tool_session = Some(self.dispatcher.begin(
            state.input.text(),
            recent,
            session.profile.address(),
        ));
        TurnPhase::Tool
    }

    async fn on_tool(
        &self,
        state: &mut TurnState,
        session: &mut Session,
        cancel: &CancellationToken,
    ) -> TurnPhase {
        let Some(tool_session) = state.tool_session.as_mut() else {
            return TurnPhase::Response;
        };
        let seen = tool_session.invocations().len();

        let step = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            step = self.dispatcher.step(tool_session) => Some(step),
        };
        let Some(step) = step else {
            state.cancelled = true;
            return TurnPhase::End;
        };

        for invocation in &tool_session.invocations()[seen..] {
            self.events.publish(CompanionEvent::ToolInvoked {
                character_id: self.character.id.clone(),
                tool: invocation.tool.clone(),
                success: invocation.is_success(),
            });
        }

        match step {
            ToolStep::Continue => TurnPhase::Tool,
            ToolStep::Done => {
                let outcome = state
                    .tool_session
                    .take()
                    .map(|s| s.into_outcome())
                    .unwrap_or_default();
                state.tool_context = outcome.context_blob(self.config.tool_context_chars);
                if outcome.used(UPDATE_USER_PROFILE) {
                    self.housekeeping.mark_profile_dirty();
                    self.refresh_profile(session).await;
                }
                TurnPhase::Response
            }
        }
    }

    async fn on_response(
        &self,
        state: &mut TurnState,
        session: &Session,
        cancel: &CancellationToken,
    ) -> TurnPhase {
        state.trials += 1;
        let context = self.response_context(state, session);

        match self.generate(&context, cancel).await {
            Attempt::Parsed(parsed) => {
                let next = state
                    .relationship
                    .apply_delta(parsed.affection_delta, &self.ruleset);
                state.parsed = Some(parsed);
                state.next_relationship = Some(next);
                TurnPhase::Persist
            }
            Attempt::Cancelled => {
                state.cancelled = true;
                TurnPhase::End
            }
            Attempt::Failed(error) => {
                warn!(trial = state.trials, error = %error, "generation attempt failed");
                let retry = RetryPolicy::should_retry(self.config.max_trial, state.trials, &error);
                state.correction = RetryPolicy::correction_for(&error);
                state.last_error = Some(error);
                if retry {
                    TurnPhase::Response
                } else {
                    TurnPhase::End
                }
            }
        }
    }

    async fn on_persist(
        &self,
        state: &mut TurnState,
        session: &mut Session,
    ) -> Result<TurnPhase, OrchestratorError> {
        let (Some(parsed), Some(next)) = (&state.parsed, &state.next_relationship) else {
            return Ok(TurnPhase::End);
        };
        let id = &self.character.id;
        let input = state.input.to_message(id);
        let reply = ChatMessage::character(
            id,
            parsed.emoticon.clone(),
            parsed.affection_delta,
            parsed.message.clone(),
        );

        self.store
            .persist_turn(id, &[input.clone(), reply.clone()], next)
            .await?;

        session.history.append(input);
        session.history.append(reply);
        session.relationship = next.clone();
        session.first_contact = false;
        if !state.input.is_system() {
            session.user_turns += 1;
        }

        self.events.publish(CompanionEvent::RelationshipChanged {
            character_id: id.clone(),
            affection: next.affection.value(),
            attitude: next.attitude.to_string(),
            delta: parsed.affection_delta,
        });
        state.persisted = true;
        Ok(TurnPhase::End)
    }

    fn response_context(&self, state: &TurnState, session: &Session) -> ResponseContext {
        let unsummarized = session.history.unsummarized();
        let tail = &unsummarized[unsummarized.len().saturating_sub(self.config.context_messages)..];
        ResponseContext {
            character: self.character.brief(),
            user: session.profile.clone(),
            relationship: state.relationship.clone(),
            summary: session
                .history
                .active_summary()
                .map(|m| m.content.clone()),
            history: history_messages(tail.iter().copied()),
            tool_results: state.tool_context.clone(),
            input: state.input.clone(),
            correction: state.correction.clone(),
            now: Local::now(),
        }
    }

    fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.config.call_timeout_secs)
    }

    /// Stream first; on a stream failure fall back to one blocking call.
    ///
    /// Every path that publishes `StreamStart` publishes exactly one of
    /// `StreamComplete` / `StreamError` afterwards.
    async fn generate(&self, context: &ResponseContext, cancel: &CancellationToken) -> Attempt {
        self.publish_stream_start();
        let mut parser = ResponseParser::new();
        let mut fragments = self.responder.stream(context);

        let pumped = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.pump(&mut fragments, &mut parser) => Some(result),
        };
        // Dropping the stream abandons the upstream call.
        drop(fragments);

        match pumped {
            None => {
                self.publish_stream_error("cancelled");
                Attempt::Cancelled
            }
            Some(Ok(streamed_message)) => match parser.finalize() {
                Ok(parsed) => {
                    if !streamed_message {
                        self.publish_whole(&parsed);
                    }
                    self.publish_stream_complete();
                    Attempt::Parsed(parsed)
                }
                Err(e) => {
                    self.publish_stream_error(&e.to_string());
                    Attempt::Failed(e.into())
                }
            },
            Some(Err(e)) => {
                self.publish_stream_error(&e.to_string());
                if e.is_credential_error() {
                    return Attempt::Failed(e.into());
                }
                debug!(error = %e, "stream failed, falling back to blocking call");
                self.invoke_fallback(context, cancel).await
            }
        }
    }

    /// Feed fragments to the parser and forward recognized fields.
    ///
    /// Returns whether any message text was forwarded. Each fragment must
    /// arrive within the call timeout.
    async fn pump(
        &self,
        fragments: &mut FragmentStream,
        parser: &mut ResponseParser,
    ) -> Result<bool, LlmError> {
        let timeout = self.call_timeout();
        let mut streamed_message = false;
        loop {
            let next = tokio::time::timeout(timeout, fragments.next())
                .await
                .map_err(|_| LlmError::Timeout(timeout.as_secs()))?;
            let Some(fragment) = next else {
                return Ok(streamed_message);
            };
            for event in parser.on_chunk(&fragment?) {
                match event {
                    ParseEvent::Emoticon(emoticon) => self.publish_emoticon(emoticon),
                    ParseEvent::Affection(delta) => debug!(delta, "affection parsed"),
                    ParseEvent::MessageChunk(text) => {
                        streamed_message = true;
                        self.publish_chunk(text);
                    }
                }
            }
        }
    }

    async fn invoke_fallback(&self, context: &ResponseContext, cancel: &CancellationToken) -> Attempt {
        self.publish_stream_start();
        let timeout = self.call_timeout();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(timeout, self.responder.invoke(context)) => Some(result),
        };

        let text = match result {
            None => {
                self.publish_stream_error("cancelled");
                return Attempt::Cancelled;
            }
            Some(Err(_)) => Err(LlmError::Timeout(timeout.as_secs())),
            Some(Ok(result)) => result,
        };
        let text = match text {
            Ok(text) => text,
            Err(e) => {
                self.publish_stream_error(&e.to_string());
                return Attempt::Failed(e.into());
            }
        };

        match ResponseParser::parse_complete(&text) {
            Ok(parsed) => {
                self.publish_whole(&parsed);
                self.publish_stream_complete();
                Attempt::Parsed(parsed)
            }
            Err(e) => {
                self.publish_stream_error(&e.to_string());
                Attempt::Failed(e.into())
            }
        }
    }

    fn publish_stream_start(&self) {
        self.events.publish(CompanionEvent::StreamStart {
            character_id: self.character.id.clone(),
        });
    }

    fn publish_emoticon(&self, emoticon: String) {
        self.events.publish(CompanionEvent::EmoticonParsed {
            character_id: self.character.id.clone(),
            emoticon,
        });
    }

    fn publish_chunk(&self, text: String) {
        self.events.publish(CompanionEvent::Chunk {
            character_id: self.character.id.clone(),
            text,
        });
    }

    /// Emoticon and full message of a reply that arrived in one piece.
    fn publish_whole(&self, parsed: &ParsedResponse) {
        self.publish_emoticon(parsed.emoticon.clone());
        self.publish_chunk(parsed.message.clone());
    }

    fn publish_stream_complete(&self) {
        self.events.publish(CompanionEvent::StreamComplete {
            character_id: self.character.id.clone(),
        });
    }

    fn publish_stream_error(&self, error: &str) {
        self.events.publish(CompanionEvent::StreamError {
            character_id: self.character.id.clone(),
            error: error.to_string(),
        });
    }
}
