//! Per-character conversation orchestrator.
//!
//! One `ConversationOrchestrator` owns the in-memory history, relationship
//! and profile view of a single character and runs turns through the
//! `Start → Tool → Response → Persist → End` machine in [`turn`]. Turns are
//! strictly sequential: user-initiated turns queue on the session lock,
//! scheduler-initiated turns are refused with [`OrchestratorError::Busy`]
//! while another turn runs.
//!
//! Background housekeeping (summarization, profile extraction) is spawned
//! after a successful persist; see [`housekeeping`].

mod debounce;
mod housekeeping;
pub mod state;
mod topics;
mod turn;

#[cfg(test)]
mod tests;

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::{Local, Timelike};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use companion_types::character::{CharacterSetting, UserProfile};
use companion_types::chat::{CharacterResponse, ChatMessage};
use companion_types::config::ConversationConfig;
use companion_types::error::RepositoryError;
use companion_types::event::CompanionEvent;
use companion_types::relationship::{AttitudeRuleset, Relationship};

use crate::agent::prompt::day_period;
use crate::agent::{ResponseAgent, ResponseSettings, TurnInput};
use crate::event::EventBus;
use crate::history::{ChatHistory, CompanionStore};
use crate::llm::BoxLlmProvider;
use crate::scheduler::{FiredTrigger, TriggerAction, TurnSink};
use crate::tool::builtin::CurrentTimeTool;
use crate::tool::{ToolDispatchAgent, ToolDispatchSettings, ToolRegistry};

pub use debounce::InputDebouncer;
pub use topics::TopicPicker;

use housekeeping::Housekeeping;

/// Errors surfaced by the orchestrator's public operations.
///
/// Generation and parse failures are not errors here: they end as a
/// fallback [`CharacterResponse`] carrying a `TurnFailure`.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("duplicate input within the debounce window")]
    Debounced,

    #[error("message is empty")]
    EmptyInput,

    #[error("another turn is in progress")]
    Busy,

    #[error("turn cancelled")]
    Cancelled,

    #[error("persistence failed: {0}")]
    Persistence(#[from] RepositoryError),

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

/// Construction options besides the character, store and generator.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub conversation: ConversationConfig,
    pub response: ResponseSettings,
    pub tools: ToolRegistry,
    /// Name from the config file; a nickname in the stored profile wins.
    pub user_name: Option<String>,
}

impl OrchestratorOptions {
    /// Defaults with `model` for replies and `current_time` as the only tool.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            conversation: ConversationConfig::default(),
            response: ResponseSettings {
                model: model.into(),
                temperature: 0.8,
                max_tokens: 1024,
            },
            tools: ToolRegistry::new().with(CurrentTimeTool),
            user_name: None,
        }
    }
}

/// Read-only view of a character's state for status displays.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub relationship: Relationship,
    pub message_count: usize,
    pub unsummarized: usize,
    pub summary: Option<String>,
    pub first_contact: bool,
    pub profile: UserProfile,
}

/// Cross-turn state, loaded lazily on first access.
struct Session {
    history: ChatHistory,
    relationship: Relationship,
    profile: UserProfile,
    first_contact: bool,
    user_turns: u32,
}

const FIRST_GREETING: &str = "The user opened the app and is meeting you for the first time this {period}. \
Introduce yourself and greet them.";
const RETURNING_GREETING: &str = "The user opened the app again this {period}. \
Greet them as someone you already know.";
const FAREWELL: &str = "The user is about to close the app. Say goodbye.";
const GENERIC_CHIT_CHAT: &str = "The user has been quiet for a while. \
Start a light, casual conversation about anything that comes to mind.";
const TRAY_RESTORE: &str = "The user just brought you back from the system tray. React to seeing them again.";

pub struct ConversationOrchestrator<S> {
    character: CharacterSetting,
    ruleset: AttitudeRuleset,
    store: Arc<S>,
    provider: BoxLlmProvider,
    responder: ResponseAgent,
    dispatcher: ToolDispatchAgent,
    config: ConversationConfig,
    user_name: Option<String>,
    events: EventBus,
    session: Mutex<Option<Session>>,
    housekeeping: Housekeeping,
    debouncer: StdMutex<InputDebouncer>,
    topics: StdMutex<TopicPicker>,
    current_turn: StdMutex<Option<CancellationToken>>,
    last_user_activity: StdMutex<Instant>,
}

impl<S: CompanionStore> ConversationOrchestrator<S> {
    pub fn new(
        character: CharacterSetting,
        store: Arc<S>,
        provider: BoxLlmProvider,
        options: OrchestratorOptions,
        events: EventBus,
    ) -> Result<Self, OrchestratorError> {
        let config = options.conversation;
        if config.max_trial == 0 {
            return Err(OrchestratorError::Configuration("max_trial must be at least 1".into()));
        }
        if config.history_window == 0 {
            return Err(OrchestratorError::Configuration(
                "history_window must be at least 1".into(),
            ));
        }
        if config.call_timeout_secs == 0 {
            return Err(OrchestratorError::Configuration(
                "call_timeout_secs must be at least 1".into(),
            ));
        }

        let dispatcher = ToolDispatchAgent::new(
            provider.clone(),
            options.tools,
            ToolDispatchSettings {
                model: options.response.model.clone(),
                iteration_cap: config.tool_iteration_cap,
                call_timeout: Duration::from_secs(config.call_timeout_secs),
                context_chars: config.tool_context_chars,
                max_tokens: 512,
            },
        );
        let summary_model = config
            .summary_model
            .clone()
            .unwrap_or_else(|| options.response.model.clone());

        Ok(Self {
            ruleset: character.attitude_ruleset(),
            character,
            store,
            responder: ResponseAgent::new(provider.clone(), options.response),
            dispatcher,
            housekeeping: Housekeeping::new(summary_model),
            provider,
            debouncer: StdMutex::new(InputDebouncer::new(Duration::from_millis(config.debounce_ms))),
            config,
            user_name: options.user_name,
            events,
            session: Mutex::new(None),
            topics: StdMutex::new(TopicPicker::new()),
            current_turn: StdMutex::new(None),
            last_user_activity: StdMutex::new(Instant::now()),
        })
    }

    pub fn character(&self) -> &CharacterSetting {
        &self.character
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run a turn for typed user text, or for a synthetic system event when
    /// `is_system` is set. Queues behind an in-flight turn.
    pub async fn send_message(
        &self,
        text: &str,
        is_system: bool,
    ) -> Result<CharacterResponse, OrchestratorError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(OrchestratorError::EmptyInput);
        }
        if is_system {
            return self.admit(true, |_| TurnInput::System(text.to_string())).await;
        }

        let now = Instant::now();
        let admitted = self
            .debouncer
            .lock()
            .map(|mut d| d.admit(text, now))
            .unwrap_or(true);
        if !admitted {
            debug!("duplicate input debounced");
            return Err(OrchestratorError::Debounced);
        }
        if let Ok(mut last) = self.last_user_activity.lock() {
            *last = now;
        }
        self.admit(true, |_| TurnInput::User(text.to_string())).await
    }

    /// Greeting turn; the prompt differs for the very first contact.
    pub async fn greet(&self) -> Result<CharacterResponse, OrchestratorError> {
        self.admit(true, |session| {
            let period = day_period(Local::now().hour());
            let template = if session.first_contact {
                FIRST_GREETING
            } else {
                RETURNING_GREETING
            };
            TurnInput::System(template.replace("{period}", period))
        })
        .await
    }

    pub async fn farewell(&self) -> Result<CharacterResponse, OrchestratorError> {
        self.admit(true, |_| TurnInput::System(FAREWELL.to_string()))
            .await
    }

    /// Unprompted small talk on a topic picked for the current affection.
    pub async fn chit_chat(&self) -> Result<CharacterResponse, OrchestratorError> {
        self.admit(true, |session| self.chit_chat_input(session)).await
    }

    /// Hand a fired trigger to the orchestrator. Never queues.
    pub async fn deliver_trigger(
        &self,
        fired: &FiredTrigger,
    ) -> Result<CharacterResponse, OrchestratorError> {
        let turn = self.admit(false, |session| {
            self.events.publish(CompanionEvent::TriggerFired {
                character_id: self.character.id.clone(),
                trigger_id: fired.trigger_id.clone(),
                priority: fired.priority,
            });
            match &fired.action {
                TriggerAction::ChitChat => self.chit_chat_input(session),
                TriggerAction::TrayRestore => TurnInput::System(TRAY_RESTORE.to_string()),
                TriggerAction::Say(message) => TurnInput::System(message.clone()),
            }
        });
        turn.await
    }

    /// Drop the whole chat history of this character, in memory and on disk.
    ///
    /// The relationship and user profile are kept.
    pub async fn reset_history(&self) -> Result<(), OrchestratorError> {
        let mut guard = self.session.lock().await;
        self.housekeeping.abort_summarization();
        self.store.save_messages(&self.character.id, &[]).await?;
        if let Some(session) = guard.as_mut() {
            session.history.clear();
        }
        info!(character_id = %self.character.id, "chat history reset");
        Ok(())
    }

    pub async fn is_first_contact(&self) -> Result<bool, OrchestratorError> {
        let mut guard = self.session.lock().await;
        Ok(self.ensure_session(&mut guard).await?.first_contact)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, OrchestratorError> {
        let mut guard = self.session.lock().await;
        let session = self.ensure_session(&mut guard).await?;
        Ok(SessionSnapshot {
            relationship: session.relationship.clone(),
            message_count: session.history.len(),
            unsummarized: session.history.unsummarized_count(),
            summary: session
                .history
                .active_summary()
                .map(|m| m.content.clone()),
            first_contact: session.first_contact,
            profile: session.profile.clone(),
        })
    }

    /// Recent history entries, summary marker included, oldest first.
    pub async fn history(&self) -> Result<Vec<ChatMessage>, OrchestratorError> {
        let mut guard = self.session.lock().await;
        let session = self.ensure_session(&mut guard).await?;
        Ok(session.history.messages().into_iter().cloned().collect())
    }

    /// Abandon the in-flight turn, if any. Returns whether one was running.
    pub fn cancel_current_turn(&self) -> bool {
        match self.current_turn.lock().ok().and_then(|t| t.clone()) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Time since the user last sent a message (or since construction).
    pub fn idle_for(&self) -> Duration {
        self.last_user_activity
            .lock()
            .map(|at| at.elapsed())
            .unwrap_or_default()
    }

    /// Lock the session, load it if needed, build the input and run a turn.
    async fn admit<F>(&self, wait: bool, build: F) -> Result<CharacterResponse, OrchestratorError>
    where
        F: FnOnce(&Session) -> TurnInput,
    {
        let mut guard = if wait {
            self.session.lock().await
        } else {
            self.session.try_lock().map_err(|_| OrchestratorError::Busy)?
        };
        let session = self.ensure_session(&mut guard).await?;
        let input = build(session);
        self.run_turn(session, input).await
    }

    async fn ensure_session<'a>(
        &self,
        slot: &'a mut Option<Session>,
    ) -> Result<&'a mut Session, OrchestratorError> {
        let session = match slot.take() {
            Some(session) => session,
            None => self.load_session().await?,
        };
        Ok(slot.insert(session))
    }

    async fn load_session(&self) -> Result<Session, RepositoryError> {
        let id = &self.character.id;
        let messages = self.store.load_messages(id).await?;
        let summary = self.store.load_summary(id).await?;
        let stored = self.store.load_relationship(id).await?;
        let profile = self.load_profile().await?;

        let first_contact = stored.is_none() && messages.is_empty();
        let relationship = stored.unwrap_or_else(|| Relationship::initial(id.clone(), &self.ruleset));
        let history =
            ChatHistory::from_persisted(id.clone(), self.config.history_window, messages, summary.as_ref());

        debug!(
            character_id = %id,
            messages = history.len(),
            affection = relationship.affection.value(),
            first_contact,
            "session loaded"
        );
        Ok(Session {
            history,
            relationship,
            profile,
            first_contact,
            user_turns: 0,
        })
    }

    async fn load_profile(&self) -> Result<UserProfile, RepositoryError> {
        let mut profile = self.store.load_profile().await?;
        if profile.display_name.is_none() {
            profile.display_name = self.user_name.clone();
        }
        Ok(profile)
    }

    fn chit_chat_input(&self, session: &Session) -> TurnInput {
        let picked = self.topics.lock().ok().and_then(|mut picker| {
            picker
                .pick(
                    &self.character.topics,
                    session.relationship.affection,
                    Instant::now(),
                    &mut rand::thread_rng(),
                )
                .map(|topic| topic.prompt.clone())
        });
        match picked {
            Some(prompt) => TurnInput::System(format!(
                "The user has been quiet for a while. Start a conversation about this: {prompt}"
            )),
            None => TurnInput::System(GENERIC_CHIT_CHAT.to_string()),
        }
    }

    fn begin_turn(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut current) = self.current_turn.lock() {
            *current = Some(token.clone());
        }
        token
    }

    fn end_turn(&self) {
        if let Ok(mut current) = self.current_turn.lock() {
            *current = None;
        }
    }
}

impl<S: CompanionStore> TurnSink for ConversationOrchestrator<S> {
    fn idle_for(&self) -> Duration {
        ConversationOrchestrator::idle_for(self)
    }

    async fn deliver(&self, fired: &FiredTrigger) -> Result<CharacterResponse, OrchestratorError> {
        self.deliver_trigger(fired).await
    }
}
