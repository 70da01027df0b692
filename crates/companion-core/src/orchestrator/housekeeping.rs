//! Background work spawned after a persisted turn.
//!
//! Summarization runs at most once at a time; its handle sits in a slot that
//! the next turn drains before assembling context, which is the only point
//! where a turn waits for background work. Profile extraction is fully
//! fire-and-forget and only flags the profile for reload.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

use companion_types::chat::{ChatMessage, ContextSummary, MessageBody};
use companion_types::event::CompanionEvent;

use crate::agent::{ContextSummarizer, ProfileExtractor};
use crate::history::{ChatHistory, CompanionStore};
use crate::tool::ToolDispatchSettings;

use super::{ConversationOrchestrator, Session};

pub(super) struct Housekeeping {
    summary_model: String,
    summary: StdMutex<Option<JoinHandle<Option<ContextSummary>>>>,
    profile: StdMutex<Option<JoinHandle<()>>>,
    profile_dirty: Arc<AtomicBool>,
}

impl Housekeeping {
    pub(super) fn new(summary_model: String) -> Self {
        Self {
            summary_model,
            summary: StdMutex::new(None),
            profile: StdMutex::new(None),
            profile_dirty: Arc::new(AtomicBool::new(false)),
        }
    }

    fn take_summary(&self) -> Option<JoinHandle<Option<ContextSummary>>> {
        self.summary.lock().ok().and_then(|mut slot| slot.take())
    }

    fn summary_in_flight(&self) -> bool {
        self.summary
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(true)
    }

    fn profile_in_flight(&self) -> bool {
        self.profile
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(true)
    }

    /// Force a profile reload before the next prompt is assembled.
    pub(super) fn mark_profile_dirty(&self) {
        self.profile_dirty.store(true, Ordering::SeqCst);
    }

    /// Stop an in-flight summarization without applying its result.
    pub(super) fn abort_summarization(&self) {
        if let Some(handle) = self.take_summary() {
            handle.abort();
        }
    }
}

impl<S: CompanionStore> ConversationOrchestrator<S> {
    /// Wait for a pending summarization and apply its result.
    pub(super) async fn await_summarization(&self, history: &mut ChatHistory) {
        let Some(handle) = self.housekeeping.take_summary() else {
            return;
        };
        if !handle.is_finished() {
            debug!("waiting for in-flight summarization");
        }
        match handle.await {
            Ok(Some(summary)) => {
                if let Err(e) = history.apply_summary(&summary) {
                    warn!(error = %e, "discarding summary that no longer fits the history");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "summarization task ended abnormally"),
        }
    }

    /// Reload the profile if an extraction pass or a tool call changed it.
    pub(super) async fn refresh_profile(&self, session: &mut Session) {
        if !self.housekeeping.profile_dirty.swap(false, Ordering::SeqCst) {
            return;
        }
        match self.load_profile().await {
            Ok(profile) => session.profile = profile,
            Err(e) => warn!(error = %e, "failed to reload user profile"),
        }
    }

    pub(super) fn spawn_housekeeping(&self, session: &Session) {
        self.maybe_spawn_summarization(&session.history);
        if session.user_turns > 0 {
            self.maybe_spawn_profile_extraction(session.user_turns);
        }
    }

    fn maybe_spawn_summarization(&self, history: &ChatHistory) {
        let config = &self.config;
        let unsummarized: Vec<ChatMessage> = history.unsummarized().into_iter().cloned().collect();
        if !ContextSummarizer::should_summarize(
            unsummarized.len(),
            config.summary_threshold,
            config.min_summarizable,
            config.keep_recent,
        ) {
            return;
        }
        if self.housekeeping.summary_in_flight() {
            debug!("summarization already in flight");
            return;
        }

        let (to_summarize, _) =
            ContextSummarizer::select_messages_to_summarize(&unsummarized, config.keep_recent);
        let to_summarize = to_summarize.to_vec();
        let covers_until = to_summarize.last().map(|m| m.id);
        let (previous, previous_count) = match history.active_summary().map(|m| (&m.content, &m.body)) {
            Some((content, MessageBody::Summary { message_count, .. })) => {
                (Some(content.clone()), *message_count)
            }
            _ => (None, 0),
        };

        let provider = self.provider.clone();
        let store = self.store.clone();
        let events = self.events.clone();
        let model = self.housekeeping.summary_model.clone();
        let character_id = self.character.id.clone();
        let character_name = self.character.name.clone();
        let span = info_span!("summarization", character_id = %character_id, messages = to_summarize.len());

        let handle = tokio::spawn(
            async move {
                let content = match ContextSummarizer::summarize(
                    &provider,
                    &character_name,
                    previous.as_deref(),
                    &to_summarize,
                    &model,
                )
                .await
                {
                    Ok(content) if !content.is_empty() => content,
                    Ok(_) => {
                        warn!("summarizer returned nothing, skipping this cycle");
                        return None;
                    }
                    Err(e) => {
                        warn!(error = %e, "summarization failed, skipping this cycle");
                        return None;
                    }
                };

                let message_count = previous_count + to_summarize.len() as u32;
                let summary = ContextSummary::new(&character_id, content, covers_until, message_count);
                if let Err(e) = store.insert_summary(&character_id, &summary).await {
                    warn!(error = %e, "failed to store summary");
                    return None;
                }
                info!(message_count, "history summarized");
                events.publish(CompanionEvent::SummaryCreated {
                    character_id,
                    message_count,
                });
                Some(summary)
            }
            .instrument(span),
        );

        if let Ok(mut slot) = self.housekeeping.summary.lock() {
            *slot = Some(handle);
        }
    }

    fn maybe_spawn_profile_extraction(&self, user_turns: u32) {
        let interval = self.config.profile_update_interval;
        if interval == 0 || user_turns % interval != 0 {
            return;
        }
        if self.housekeeping.profile_in_flight() {
            debug!("profile extraction already in flight");
            return;
        }

        let extractor = ProfileExtractor::new(
            self.provider.clone(),
            self.store.clone(),
            ToolDispatchSettings {
                model: self.housekeeping.summary_model.clone(),
                ..self.dispatcher.settings().clone()
            },
        );
        let dirty = self.housekeeping.profile_dirty.clone();
        let character_id = self.character.id.clone();
        let character_name = self.character.name.clone();
        // Both sides of the last `interval` exchanges.
        let window = interval as usize * 2;
        let span = info_span!("profile_extraction", character_id = %character_id);

        let handle = tokio::spawn(
            async move {
                match extractor.extract(&character_id, &character_name, window).await {
                    Ok(0) => debug!("no new profile facts"),
                    Ok(applied) => {
                        info!(applied, "user profile updated");
                        dirty.store(true, Ordering::SeqCst);
                    }
                    Err(e) => warn!(error = %e, "profile extraction failed"),
                }
            }
            .instrument(span),
        );

        if let Ok(mut slot) = self.housekeeping.profile.lock() {
            *slot = Some(handle);
        }
    }
}
