//! Periodic user-profile extraction.
//!
//! Reads the last raw exchanges (regardless of summarization state) and lets
//! the generator record new facts through the `update_user_profile` tool.

use std::sync::Arc;

use companion_types::chat::{ChatMessage, MessageBody};
use companion_types::error::RepositoryError;
use companion_types::llm::Message;

use crate::history::CompanionStore;
use crate::llm::BoxLlmProvider;
use crate::tool::builtin::UpdateUserProfileTool;
use crate::tool::{ToolDispatchAgent, ToolDispatchSettings, ToolRegistry};

const PROFILE_SYSTEM_PROMPT: &str = "You maintain a profile of the user for a companion app. \
Read the recent conversation and call update_user_profile with any durable facts about the user \
that are not already known (name or nickname, preferences, routines, people and events in their life). \
Ignore small talk and anything the character said about itself. \
If there is nothing new, answer with the single word NONE and call no tool.";

pub struct ProfileExtractor<R> {
    agent: ToolDispatchAgent,
    store: Arc<R>,
}

impl<R: CompanionStore> ProfileExtractor<R> {
    pub fn new(provider: BoxLlmProvider, store: Arc<R>, settings: ToolDispatchSettings) -> Self {
        let registry = ToolRegistry::new().with(UpdateUserProfileTool::new(store.clone()));
        Self {
            agent: ToolDispatchAgent::new(provider, registry, settings),
            store,
        }
    }

    /// Run one extraction pass over the last `window` raw messages.
    ///
    /// Returns how many profile updates were applied.
    #[tracing::instrument(name = "extract_profile", skip(self, character_name))]
    pub async fn extract(
        &self,
        character_id: &str,
        character_name: &str,
        window: usize,
    ) -> Result<usize, RepositoryError> {
        let recent = self.store.recent_raw_messages(character_id, window).await?;
        if recent.is_empty() {
            return Ok(0);
        }
        let profile = self.store.load_profile().await?;

        let mut prompt = String::new();
        if !profile.facts.is_empty() || profile.nickname.is_some() {
            prompt.push_str("<known_profile>\n");
            if let Some(nickname) = &profile.nickname {
                prompt.push_str(&format!("Nickname: {nickname}\n"));
            }
            for fact in &profile.facts {
                prompt.push_str(&format!("- {fact}\n"));
            }
            prompt.push_str("</known_profile>\n\n");
        }
        prompt.push_str(&format!(
            "<conversation>\n{}\n</conversation>",
            transcript(&recent, character_name)
        ));

        let session = self
            .agent
            .begin_with(PROFILE_SYSTEM_PROMPT, vec![Message::user(prompt)]);
        let outcome = self.agent.run(session).await;

        let applied = outcome
            .invocations
            .iter()
            .filter(|inv| {
                inv.output
                    .as_deref()
                    .is_ok_and(|out| out.starts_with("profile updated"))
            })
            .count();
        tracing::debug!(applied, "profile extraction finished");
        Ok(applied)
    }
}

fn transcript(messages: &[ChatMessage], character_name: &str) -> String {
    messages
        .iter()
        .filter_map(|m| match &m.body {
            MessageBody::User => Some(format!("User: {}", m.content)),
            MessageBody::Character { .. } => Some(format!("{character_name}: {}", m.content)),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}
