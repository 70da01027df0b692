//! Rolling summarization of older chat history.
//!
//! `ContextSummarizer` condenses the oldest unsummarized messages into a
//! summary that also folds in the previous one, so a single active summary
//! always covers everything before the checkpoint.

use companion_types::chat::{ChatMessage, MessageBody};
use companion_types::llm::{CompletionRequest, LlmError, Message};

use crate::llm::BoxLlmProvider;

const SUMMARY_SYSTEM_PROMPT: &str = r#"You keep the long-term memory of a companion character. Summarize the conversation segment concisely. Preserve:
1. Facts the user shared about themselves
2. Promises, plans and open questions
3. How the mood between the user and the character developed

If an earlier summary is given, merge it with the new segment into one summary. Keep it under 300 words. Write in third person ("The user said..." "The character...")."#;

/// Stateless helpers for history summarization.
pub struct ContextSummarizer;

impl ContextSummarizer {
    /// Whether the unsummarized tail is long enough to condense.
    ///
    /// True when the tail exceeds `threshold` and at least
    /// `min_summarizable` messages lie beyond the `keep_recent` buffer.
    pub fn should_summarize(
        unsummarized: usize,
        threshold: usize,
        min_summarizable: usize,
        keep_recent: usize,
    ) -> bool {
        unsummarized > threshold && unsummarized.saturating_sub(keep_recent) >= min_summarizable
    }

    /// Split messages into `(to_summarize, to_keep)`; `to_keep` holds the
    /// most recent `keep_recent` messages.
    pub fn select_messages_to_summarize(
        messages: &[ChatMessage],
        keep_recent: usize,
    ) -> (&[ChatMessage], &[ChatMessage]) {
        if messages.len() <= keep_recent {
            (&[], messages)
        } else {
            messages.split_at(messages.len() - keep_recent)
        }
    }

    /// Summarize `messages`, merging in `previous` when present.
    #[tracing::instrument(
        name = "summarize_history",
        skip(provider, previous, messages),
        fields(model = %model, message_count = messages.len())
    )]
    pub async fn summarize(
        provider: &BoxLlmProvider,
        character_name: &str,
        previous: Option<&str>,
        messages: &[ChatMessage],
        model: &str,
    ) -> Result<String, LlmError> {
        if messages.is_empty() {
            return Ok(previous.unwrap_or_default().to_string());
        }

        let conversation_text = messages
            .iter()
            .filter_map(|m| match &m.body {
                MessageBody::User => Some(format!("User: {}", m.content)),
                MessageBody::Character { .. } => Some(format!("{character_name}: {}", m.content)),
                MessageBody::System => Some(format!("Event: {}", m.content)),
                MessageBody::Summary { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut prompt = String::new();
        if let Some(previous) = previous.filter(|p| !p.trim().is_empty()) {
            prompt.push_str(&format!(
                "<earlier_summary>\n{}\n</earlier_summary>\n\n",
                previous.trim()
            ));
        }
        prompt.push_str(&format!(
            "Please summarize this conversation:\n\n<conversation>\n{conversation_text}\n</conversation>"
        ));

        let mut request = CompletionRequest::new(
            model,
            Some(SUMMARY_SYSTEM_PROMPT.to_string()),
            vec![Message::user(prompt)],
        );
        request.temperature = Some(0.0);

        let response = provider.complete(&request).await?;
        Ok(response.content.trim().to_string())
    }
}
