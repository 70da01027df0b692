//! Tool dispatch agent: a bounded generate-call-feed-back loop.
//!
//! The loop is exposed step by step so the orchestrator can treat the tool
//! phase as a state that re-enters itself until the session reports
//! [`ToolStep::Done`]. Generator failures inside the loop never fail the
//! turn; they degrade the session to an empty outcome.

use std::time::Duration;

use companion_types::llm::{CompletionRequest, Message};
use tracing::{debug, warn};

use crate::llm::BoxLlmProvider;

use super::prefilter::{self, ToolDecision};
use super::registry::{ToolError, ToolRegistry};

const TOOL_SYSTEM_PROMPT: &str = "You prepare background information for a companion character who is \
about to answer the user. Call the available tools when they help answer the latest user message. \
When you have what you need, reply with a short factual note of what you found. \
Do not write the character's reply yourself.";

/// Knobs for the tool loop.
#[derive(Debug, Clone)]
pub struct ToolDispatchSettings {
    pub model: String,
    /// Maximum generator rounds per session.
    pub iteration_cap: u32,
    /// Applies to each generator call and each tool invocation.
    pub call_timeout: Duration,
    /// Upper bound of the context blob handed to the response agent.
    pub context_chars: usize,
    pub max_tokens: u32,
}

impl ToolDispatchSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            iteration_cap: 5,
            call_timeout: Duration::from_secs(30),
            context_chars: 1200,
            max_tokens: 512,
        }
    }
}

/// One tool call made during a session.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub tool: String,
    pub arguments: serde_json::Value,
    pub output: Result<String, ToolError>,
}

impl ToolInvocation {
    pub fn is_success(&self) -> bool {
        self.output.is_ok()
    }
}

/// What the tool phase hands to the response phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutcome {
    pub invocations: Vec<ToolInvocation>,
    /// The generator's closing note, if it wrote one.
    pub synthesis: Option<String>,
    /// The iteration cap ended the session.
    pub exhausted: bool,
}

impl ToolOutcome {
    /// Whether a successful call of `tool` happened in this session.
    pub fn used(&self, tool: &str) -> bool {
        self.invocations
            .iter()
            .any(|i| i.tool == tool && i.is_success())
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Compact summary of successful tool results, at most `max_chars` long.
    ///
    /// `None` when no tool produced anything usable.
    pub fn context_blob(&self, max_chars: usize) -> Option<String> {
        let mut lines: Vec<String> = self
            .invocations
            .iter()
            .filter_map(|inv| {
                inv.output
                    .as_ref()
                    .ok()
                    .map(|out| format!("- {}: {}", inv.tool, out.trim()))
            })
            .collect();
        if lines.is_empty() {
            return None;
        }
        if let Some(note) = self.synthesis.as_deref().filter(|s| !s.trim().is_empty()) {
            lines.push(format!("Note: {}", note.trim()));
        }
        Some(truncate_chars(&lines.join("\n"), max_chars))
    }
}

/// Whether the orchestrator should step the session again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStep {
    Continue,
    Done,
}

/// Conversation state of one tool loop.
#[derive(Debug)]
pub struct ToolSession {
    system: String,
    messages: Vec<Message>,
    invocations: Vec<ToolInvocation>,
    synthesis: Option<String>,
    iterations: u32,
    finished: bool,
    exhausted: bool,
}

impl ToolSession {
    fn new(system: String, messages: Vec<Message>) -> Self {
        Self {
            system,
            messages,
            invocations: Vec::new(),
            synthesis: None,
            iterations: 0,
            finished: false,
            exhausted: false,
        }
    }

    pub fn invocations(&self) -> &[ToolInvocation] {
        &self.invocations
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn into_outcome(self) -> ToolOutcome {
        ToolOutcome {
            invocations: self.invocations,
            synthesis: self.synthesis,
            exhausted: self.exhausted,
        }
    }

    /// Drop everything gathered so far and finish.
    fn abandon(&mut self) {
        self.invocations.clear();
        self.synthesis = None;
        self.finished = true;
    }
}

/// Runs tool-augmented generation for a single turn.
#[derive(Debug, Clone)]
pub struct ToolDispatchAgent {
    provider: BoxLlmProvider,
    registry: ToolRegistry,
    settings: ToolDispatchSettings,
}

impl ToolDispatchAgent {
    pub fn new(provider: BoxLlmProvider, registry: ToolRegistry, settings: ToolDispatchSettings) -> Self {
        Self {
            provider,
            registry,
            settings,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &ToolDispatchSettings {
        &self.settings
    }

    /// Pre-filter decision; an empty registry always skips.
    pub fn decide(&self, text: &str, is_system: bool) -> ToolDecision {
        if self.registry.is_empty() {
            return ToolDecision::Skip("no tools registered");
        }
        prefilter::decide(text, is_system)
    }

    /// Start a session for a user message with some recent context.
    pub fn begin(&self, user_text: &str, recent: Vec<Message>, user_name: Option<&str>) -> ToolSession {
        let mut system = TOOL_SYSTEM_PROMPT.to_string();
        if let Some(name) = user_name {
            system.push_str(&format!("\nThe user's name is {name}."));
        }
        let mut messages = recent;
        messages.push(Message::user(user_text));
        ToolSession::new(system, messages)
    }

    /// Start a session with a caller-provided system prompt.
    pub fn begin_with(&self, system: impl Into<String>, messages: Vec<Message>) -> ToolSession {
        ToolSession::new(system.into(), messages)
    }

    /// One generator round plus the tool calls it asked for.
    #[tracing::instrument(
        name = "tool_step",
        skip_all,
        fields(iteration = session.iterations + 1, cap = self.settings.iteration_cap)
    )]
    pub async fn step(&self, session: &mut ToolSession) -> ToolStep {
        if session.finished {
            return ToolStep::Done;
        }
        if session.iterations >= self.settings.iteration_cap {
            debug!("tool iteration cap reached");
            session.exhausted = true;
            session.finished = true;
            return ToolStep::Done;
        }
        session.iterations += 1;

        let mut request = CompletionRequest::new(
            self.settings.model.clone(),
            Some(session.system.clone()),
            session.messages.clone(),
        );
        request.tools = self.registry.definitions();
        request.temperature = Some(0.0);
        request.max_tokens = self.settings.max_tokens;

        let response =
            match tokio::time::timeout(self.settings.call_timeout, self.provider.complete(&request)).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    warn!(error = %e, "tool generation failed, continuing without tools");
                    session.abandon();
                    return ToolStep::Done;
                }
                Err(_) => {
                    warn!(
                        timeout_secs = self.settings.call_timeout.as_secs(),
                        "tool generation timed out, continuing without tools"
                    );
                    session.abandon();
                    return ToolStep::Done;
                }
            };

        if response.tool_calls.is_empty() {
            let note = response.content.trim();
            if !note.is_empty() {
                session.synthesis = Some(note.to_string());
            }
            session.finished = true;
            return ToolStep::Done;
        }

        session.messages.push(Message::assistant_tool_calls(
            response.content.clone(),
            response.tool_calls.clone(),
        ));

        for call in response.tool_calls {
            let output = match tokio::time::timeout(
                self.settings.call_timeout,
                self.registry.invoke(&call.name, call.arguments.clone()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ToolError::Timeout(self.settings.call_timeout.as_secs())),
            };

            let feedback = match &output {
                Ok(text) => text.clone(),
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "tool invocation failed");
                    format!("error: {e}")
                }
            };
            session.messages.push(Message::tool_result(call.id.clone(), feedback));
            session.invocations.push(ToolInvocation {
                tool: call.name,
                arguments: call.arguments,
                output,
            });
        }

        ToolStep::Continue
    }

    /// Drive a session to completion.
    pub async fn run(&self, mut session: ToolSession) -> ToolOutcome {
        while self.step(&mut session).await == ToolStep::Continue {}
        session.into_outcome()
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use crate::tool::builtin::CurrentTimeTool;
    use companion_types::llm::{LlmError, ToolCall};
    use serde_json::json;

    fn agent(provider: ScriptedProvider, cap: u32) -> ToolDispatchAgent {
        let mut settings = ToolDispatchSettings::new("test-model");
        settings.iteration_cap = cap;
        ToolDispatchAgent::new(
            BoxLlmProvider::new(provider),
            ToolRegistry::new().with(CurrentTimeTool),
            settings,
        )
    }

    fn time_call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "current_time".to_string(),
            arguments: json!({}),
        }
    }

    #[tokio::test]
    async fn tool_call_then_note() {
        let provider = ScriptedProvider::new()
            .complete_tool_calls(vec![time_call("c1")])
            .complete_ok("It is evening for the user.");
        let agent = agent(provider, 5);

        let outcome = agent.run(agent.begin("what time is it?", vec![], None)).await;
        assert_eq!(outcome.invocations.len(), 1);
        assert!(outcome.invocations[0].is_success());
        let blob = outcome.context_blob(500).unwrap();
        assert!(blob.starts_with("- current_time: "));
        assert!(blob.ends_with("Note: It is evening for the user."));
    }

    #[tokio::test]
    async fn iteration_cap_bounds_the_loop() {
        let provider = ScriptedProvider::new()
            .complete_tool_calls(vec![time_call("c1")])
            .complete_tool_calls(vec![time_call("c2")])
            .complete_tool_calls(vec![time_call("c3")]);
        let agent = agent(provider, 2);

        let mut session = agent.begin("what time is it?", vec![], None);
        assert_eq!(agent.step(&mut session).await, ToolStep::Continue);
        assert_eq!(agent.step(&mut session).await, ToolStep::Continue);
        assert_eq!(agent.step(&mut session).await, ToolStep::Done);

        let outcome = session.into_outcome();
        assert!(outcome.exhausted);
        assert_eq!(outcome.invocations.len(), 2);
    }

    #[tokio::test]
    async fn generator_failure_degrades_to_empty_outcome() {
        let provider = ScriptedProvider::new()
            .complete_tool_calls(vec![time_call("c1")])
            .complete_err(LlmError::Overloaded("busy".into()));
        let agent = agent(provider, 5);

        let outcome = agent.run(agent.begin("what time is it?", vec![], None)).await;
        assert_eq!(outcome, ToolOutcome::empty());
        assert_eq!(outcome.context_blob(100), None);
    }

    #[tokio::test]
    async fn unknown_tool_is_recorded_and_loop_continues() {
        let provider = ScriptedProvider::new()
            .complete_tool_calls(vec![ToolCall {
                id: "c1".into(),
                name: "weather".into(),
                arguments: json!({}),
            }])
            .complete_ok("");
        let agent = agent(provider, 5);

        let outcome = agent.run(agent.begin("weather?", vec![], None)).await;
        assert_eq!(outcome.invocations.len(), 1);
        assert_eq!(
            outcome.invocations[0].output,
            Err(ToolError::UnknownTool("weather".into()))
        );
        assert_eq!(outcome.context_blob(100), None);
    }

    #[test]
    fn context_blob_is_truncated() {
        let outcome = ToolOutcome {
            invocations: vec![ToolInvocation {
                tool: "t".into(),
                arguments: json!({}),
                output: Ok("x".repeat(100)),
            }],
            synthesis: None,
            exhausted: false,
        };
        let blob = outcome.context_blob(20).unwrap();
        assert_eq!(blob.chars().count(), 20);
        assert!(blob.ends_with("..."));
    }

    #[test]
    fn empty_registry_skips() {
        let agent = ToolDispatchAgent::new(
            BoxLlmProvider::new(ScriptedProvider::new()),
            ToolRegistry::new(),
            ToolDispatchSettings::new("m"),
        );
        assert_eq!(
            agent.decide("what's the weather", false),
            ToolDecision::Skip("no tools registered")
        );
    }
}
