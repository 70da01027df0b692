//! Test doubles shared by the unit tests of this crate.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::Stream;

use companion_types::character::UserProfile;
use companion_types::chat::{ChatMessage, ContextSummary};
use companion_types::error::RepositoryError;
use companion_types::llm::{
    CompletionRequest, CompletionResponse, LlmError, ProviderCapabilities, StopReason,
    StreamEvent, ToolCall, Usage,
};
use companion_types::relationship::Relationship;

use crate::history::{
    ChatHistoryRepository, RelationshipRepository, TurnRepository, UserProfileRepository,
};
use crate::llm::LlmProvider;

enum StreamScript {
    Chunks(Vec<String>),
    FailAfter(Vec<String>, LlmError),
    Hang(Vec<String>),
}

#[derive(Default)]
struct Script {
    streams: VecDeque<StreamScript>,
    completions: VecDeque<Result<CompletionResponse, LlmError>>,
    requests: Vec<CompletionRequest>,
}

/// Generator that replays queued outputs in order.
///
/// Clones share the same script, so a test can keep one handle to inspect
/// the recorded requests after handing another to the code under test.
#[derive(Clone)]
pub struct ScriptedProvider {
    script: Arc<Mutex<Script>>,
    capabilities: ProviderCapabilities,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script::default())),
            capabilities: ProviderCapabilities {
                streaming: true,
                tool_calling: true,
                max_context_tokens: 128_000,
                max_output_tokens: 4096,
            },
        }
    }

    /// Queue a successful stream delivering `text` in small fragments.
    pub fn stream_ok(self, text: &str) -> Self {
        self.push_stream(StreamScript::Chunks(fragments(text)))
    }

    /// Queue a stream that yields `partial` and then fails.
    pub fn stream_fail(self, partial: &str, error: LlmError) -> Self {
        self.push_stream(StreamScript::FailAfter(fragments(partial), error))
    }

    /// Queue a stream that yields `partial` and then never finishes.
    pub fn stream_hang(self, partial: &str) -> Self {
        self.push_stream(StreamScript::Hang(fragments(partial)))
    }

    pub fn complete_ok(self, text: &str) -> Self {
        self.push_completion(Ok(response(text, Vec::new())))
    }

    pub fn complete_tool_calls(self, calls: Vec<ToolCall>) -> Self {
        self.push_completion(Ok(response("", calls)))
    }

    pub fn complete_err(self, error: LlmError) -> Self {
        self.push_completion(Err(error))
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.lock().requests.clone()
    }

    pub fn pending_streams(&self) -> usize {
        self.lock().streams.len()
    }

    pub fn pending_completions(&self) -> usize {
        self.lock().completions.len()
    }

    fn push_stream(self, script: StreamScript) -> Self {
        self.lock().streams.push_back(script);
        self
    }

    fn push_completion(self, result: Result<CompletionResponse, LlmError>) -> Self {
        self.lock().completions.push_back(result);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut script = self.lock();
        script.requests.push(request.clone());
        script.completions.pop_front().unwrap_or_else(|| {
            Err(LlmError::Provider {
                message: "completion script exhausted".into(),
            })
        })
    }

    fn stream(
        &self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>> {
        let next = {
            let mut script = self.lock();
            script.requests.push(request);
            script.streams.pop_front()
        };

        Box::pin(async_stream::try_stream! {
            match next {
                Some(StreamScript::Chunks(chunks)) => {
                    yield StreamEvent::Connected;
                    for (index, text) in chunks.into_iter().enumerate() {
                        yield StreamEvent::TextDelta { index: index as u32, text };
                    }
                    yield StreamEvent::MessageDelta { stop_reason: StopReason::EndTurn };
                    yield StreamEvent::Done;
                }
                Some(StreamScript::FailAfter(chunks, error)) => {
                    yield StreamEvent::Connected;
                    for (index, text) in chunks.into_iter().enumerate() {
                        yield StreamEvent::TextDelta { index: index as u32, text };
                    }
                    Err::<(), LlmError>(error)?;
                }
                Some(StreamScript::Hang(chunks)) => {
                    yield StreamEvent::Connected;
                    for (index, text) in chunks.into_iter().enumerate() {
                        yield StreamEvent::TextDelta { index: index as u32, text };
                    }
                    futures_util::future::pending::<()>().await;
                }
                None => {
                    Err::<(), LlmError>(LlmError::Stream("stream script exhausted".into()))?;
                }
            }
        })
    }
}

fn fragments(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(5).map(|c| c.iter().collect()).collect()
}

fn response(text: &str, tool_calls: Vec<ToolCall>) -> CompletionResponse {
    CompletionResponse {
        id: "resp".into(),
        content: text.to_string(),
        model: "scripted-model".into(),
        stop_reason: if tool_calls.is_empty() {
            StopReason::EndTurn
        } else {
            StopReason::ToolUse
        },
        usage: Usage::default(),
        tool_calls,
    }
}

#[derive(Default)]
struct Tables {
    messages: HashMap<String, Vec<ChatMessage>>,
    summaries: HashMap<String, Vec<ContextSummary>>,
    relationships: HashMap<String, Relationship>,
    profile: UserProfile,
}

/// In-memory implementation of every repository port.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
    fail_relationship_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a query error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make only relationship writes fail; message writes still succeed.
    pub fn fail_relationship_writes(&self, fail: bool) {
        self.fail_relationship_writes.store(fail, Ordering::SeqCst);
    }

    pub fn messages(&self, character_id: &str) -> Vec<ChatMessage> {
        self.tables().messages.get(character_id).cloned().unwrap_or_default()
    }

    pub fn summaries(&self, character_id: &str) -> Vec<ContextSummary> {
        self.tables().summaries.get(character_id).cloned().unwrap_or_default()
    }

    pub fn relationship(&self, character_id: &str) -> Option<Relationship> {
        self.tables().relationships.get(character_id).cloned()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap()
    }

    fn check_write(&self) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(RepositoryError::Query("disk full".into()))
        } else {
            Ok(())
        }
    }

    fn check_relationship_write(&self) -> Result<(), RepositoryError> {
        self.check_write()?;
        if self.fail_relationship_writes.load(Ordering::SeqCst) {
            Err(RepositoryError::Query("relationships table locked".into()))
        } else {
            Ok(())
        }
    }
}

impl ChatHistoryRepository for MemoryStore {
    async fn load_messages(&self, character_id: &str) -> Result<Vec<ChatMessage>, RepositoryError> {
        Ok(self.messages(character_id))
    }

    async fn append_messages(
        &self,
        character_id: &str,
        messages: &[ChatMessage],
    ) -> Result<(), RepositoryError> {
        self.check_write()?;
        self.tables()
            .messages
            .entry(character_id.to_string())
            .or_default()
            .extend(messages.iter().cloned());
        Ok(())
    }

    async fn save_messages(
        &self,
        character_id: &str,
        messages: &[ChatMessage],
    ) -> Result<(), RepositoryError> {
        self.check_write()?;
        let mut tables = self.tables();
        tables
            .messages
            .insert(character_id.to_string(), messages.to_vec());
        tables.summaries.remove(character_id);
        Ok(())
    }

    async fn load_summary(
        &self,
        character_id: &str,
    ) -> Result<Option<ContextSummary>, RepositoryError> {
        Ok(self.summaries(character_id).last().cloned())
    }

    async fn insert_summary(
        &self,
        character_id: &str,
        summary: &ContextSummary,
    ) -> Result<(), RepositoryError> {
        self.check_write()?;
        self.tables()
            .summaries
            .entry(character_id.to_string())
            .or_default()
            .push(summary.clone());
        Ok(())
    }

    async fn recent_raw_messages(
        &self,
        character_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let raw: Vec<ChatMessage> = self
            .messages(character_id)
            .into_iter()
            .filter(ChatMessage::is_raw)
            .collect();
        let skip = raw.len().saturating_sub(limit);
        Ok(raw.into_iter().skip(skip).collect())
    }
}

impl RelationshipRepository for MemoryStore {
    async fn load_relationship(
        &self,
        character_id: &str,
    ) -> Result<Option<Relationship>, RepositoryError> {
        Ok(self.relationship(character_id))
    }

    async fn save_relationship(&self, relationship: &Relationship) -> Result<(), RepositoryError> {
        self.check_relationship_write()?;
        self.tables()
            .relationships
            .insert(relationship.character_id.clone(), relationship.clone());
        Ok(())
    }
}

impl TurnRepository for MemoryStore {
    async fn persist_turn(
        &self,
        character_id: &str,
        messages: &[ChatMessage],
        relationship: &Relationship,
    ) -> Result<(), RepositoryError> {
        self.check_write()?;
        self.check_relationship_write()?;
        let mut tables = self.tables();
        tables
            .messages
            .entry(character_id.to_string())
            .or_default()
            .extend(messages.iter().cloned());
        tables
            .relationships
            .insert(relationship.character_id.clone(), relationship.clone());
        Ok(())
    }
}

impl UserProfileRepository for MemoryStore {
    async fn load_profile(&self) -> Result<UserProfile, RepositoryError> {
        Ok(self.tables().profile.clone())
    }

    async fn save_profile(&self, profile: &UserProfile) -> Result<(), RepositoryError> {
        self.check_write()?;
        self.tables().profile = profile.clone();
        Ok(())
    }
}
