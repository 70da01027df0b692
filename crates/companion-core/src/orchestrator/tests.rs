use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;

use companion_types::character::CharacterSetting;
use companion_types::chat::{MessageKind, TurnErrorKind};
use companion_types::event::CompanionEvent;
use companion_types::llm::{LlmError, ToolCall};

use super::*;
use crate::history::UserProfileRepository;
use crate::testing::{MemoryStore, ScriptedProvider};
use crate::tool::builtin::UpdateUserProfileTool;

const REPLY: &str = "EMOTICON: happy\nAFFECTION: 3\nMESSAGE:\nNice to meet you!";
const HANGING: &str = "EMOTICON: shy\nAFFECTION: 1\nMESSAGE:\nUm, well";

fn options() -> OrchestratorOptions {
    let mut options = OrchestratorOptions::new("test-model");
    options.tools = ToolRegistry::new();
    options.conversation.profile_update_interval = 0;
    options
}

fn build(
    provider: &ScriptedProvider,
    store: Arc<MemoryStore>,
    options: OrchestratorOptions,
) -> ConversationOrchestrator<MemoryStore> {
    ConversationOrchestrator::new(
        CharacterSetting::builtin(),
        store,
        BoxLlmProvider::new(provider.clone()),
        options,
        EventBus::new(256),
    )
    .unwrap()
}

fn drain(rx: &mut broadcast::Receiver<CompanionEvent>) -> Vec<CompanionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn count(events: &[CompanionEvent], pred: impl Fn(&CompanionEvent) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}

async fn wait_for_stream_start(rx: &mut broadcast::Receiver<CompanionEvent>) {
    loop {
        if let CompanionEvent::StreamStart { .. } = rx.recv().await.unwrap() {
            return;
        }
    }
}

#[tokio::test]
async fn successful_turn_persists_both_messages_and_relationship() {
    let provider = ScriptedProvider::new().stream_ok(REPLY);
    let store = Arc::new(MemoryStore::new());
    let orchestrator = build(&provider, store.clone(), options());

    let response = orchestrator.send_message("hi, I'm new here", false).await.unwrap();

    assert!(response.is_success());
    assert_eq!(response.emoticon, "happy");
    assert_eq!(response.affection_delta, 3);
    assert_eq!(response.message, "Nice to meet you!");
    assert_eq!(response.relationship.affection.value(), 53);

    let stored = store.messages("lumi");
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].kind(), MessageKind::User);
    assert_eq!(stored[0].content, "hi, I'm new here");
    assert_eq!(stored[1].kind(), MessageKind::Character);
    assert_eq!(store.relationship("lumi").unwrap().affection.value(), 53);

    let snapshot = orchestrator.snapshot().await.unwrap();
    assert_eq!(snapshot.message_count, 2);
    assert!(!snapshot.first_contact);
}

#[tokio::test]
async fn stream_events_are_ordered() {
    let provider = ScriptedProvider::new().stream_ok(REPLY);
    let orchestrator = build(&provider, Arc::new(MemoryStore::new()), options());
    let mut rx = orchestrator.events().subscribe();

    orchestrator.send_message("hello", false).await.unwrap();
    let events = drain(&mut rx);

    assert!(matches!(events[0], CompanionEvent::StreamStart { .. }));
    let emoticon = events
        .iter()
        .position(|e| matches!(e, CompanionEvent::EmoticonParsed { emoticon, .. } if emoticon == "happy"))
        .unwrap();
    let first_chunk = events
        .iter()
        .position(|e| matches!(e, CompanionEvent::Chunk { .. }))
        .unwrap();
    let last_chunk = events
        .iter()
        .rposition(|e| matches!(e, CompanionEvent::Chunk { .. }))
        .unwrap();
    let complete = events
        .iter()
        .position(|e| matches!(e, CompanionEvent::StreamComplete { .. }))
        .unwrap();
    assert!(emoticon < first_chunk);
    assert!(last_chunk < complete);
    assert_eq!(count(&events, CompanionEvent::is_stream_terminal), 1);

    let streamed: String = events
        .iter()
        .filter_map(|e| match e {
            CompanionEvent::Chunk { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert!(streamed.contains("Nice to meet"));

    assert!(matches!(
        events[events.len() - 2],
        CompanionEvent::RelationshipChanged { delta: 3, affection: 53, .. }
    ));
    assert!(matches!(
        events.last(),
        Some(CompanionEvent::TurnCompleted { success: true, trials: 1, .. })
    ));
}

#[tokio::test]
async fn malformed_output_is_retried_with_a_correction() {
    let provider = ScriptedProvider::new()
        .stream_ok("I am not following the format at all")
        .stream_ok(REPLY);
    let store = Arc::new(MemoryStore::new());
    let orchestrator = build(&provider, store.clone(), options());
    let mut rx = orchestrator.events().subscribe();

    let response = orchestrator.send_message("hey there", false).await.unwrap();
    assert!(response.is_success());

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert!(
        requests[1]
            .messages
            .last()
            .unwrap()
            .content
            .contains("could not be read")
    );

    let events = drain(&mut rx);
    assert_eq!(count(&events, |e| matches!(e, CompanionEvent::StreamStart { .. })), 2);
    assert_eq!(count(&events, CompanionEvent::is_stream_terminal), 2);
    assert!(matches!(
        events.last(),
        Some(CompanionEvent::TurnCompleted { success: true, trials: 2, .. })
    ));
    assert_eq!(store.messages("lumi").len(), 2);
}

#[tokio::test]
async fn exhausted_trials_return_a_fallback_and_persist_nothing() {
    let provider = ScriptedProvider::new()
        .stream_ok("nope")
        .stream_ok("still nope")
        .stream_ok("nope again");
    let store = Arc::new(MemoryStore::new());
    let orchestrator = build(&provider, store.clone(), options());

    let response = orchestrator.send_message("talk to me", false).await.unwrap();

    let failure = response.failure.clone().unwrap();
    assert_eq!(failure.error_type, TurnErrorKind::ParseError);
    assert_eq!(failure.trials, 3);
    assert_eq!(response.affection_delta, 0);
    assert_eq!(response.relationship.affection.value(), 50);
    assert_eq!(provider.pending_streams(), 0);
    assert!(store.messages("lumi").is_empty());
    assert!(store.relationship("lumi").is_none());
}

#[tokio::test]
async fn missing_api_key_is_not_retried() {
    let provider = ScriptedProvider::new().stream_fail(
        "",
        LlmError::ApiKeyNotDefined {
            provider: "openai".into(),
        },
    );
    let orchestrator = build(&provider, Arc::new(MemoryStore::new()), options());

    let response = orchestrator.send_message("anyone there?", false).await.unwrap();

    let failure = response.failure.unwrap();
    assert_eq!(failure.error_type, TurnErrorKind::ApiKeyNotDefined);
    assert_eq!(failure.trials, 1);
    assert_eq!(provider.requests().len(), 1);
}

#[tokio::test]
async fn stream_failure_falls_back_to_a_single_call() {
    let provider = ScriptedProvider::new()
        .stream_fail("EMOTI", LlmError::Stream("connection reset".into()))
        .complete_ok(REPLY);
    let store = Arc::new(MemoryStore::new());
    let orchestrator = build(&provider, store.clone(), options());
    let mut rx = orchestrator.events().subscribe();

    let response = orchestrator.send_message("how are you", false).await.unwrap();
    assert!(response.is_success());
    assert_eq!(response.message, "Nice to meet you!");

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].stream);
    assert!(!requests[1].stream);

    let events = drain(&mut rx);
    assert_eq!(count(&events, |e| matches!(e, CompanionEvent::StreamStart { .. })), 2);
    assert_eq!(count(&events, |e| matches!(e, CompanionEvent::StreamError { .. })), 1);
    assert_eq!(count(&events, |e| matches!(e, CompanionEvent::StreamComplete { .. })), 1);
    assert!(events.iter().any(
        |e| matches!(e, CompanionEvent::Chunk { text, .. } if text == "Nice to meet you!")
    ));
    assert_eq!(store.messages("lumi").len(), 2);
}

#[tokio::test]
async fn cancelled_turn_persists_nothing() {
    let provider = ScriptedProvider::new().stream_hang(HANGING);
    let store = Arc::new(MemoryStore::new());
    let orchestrator = Arc::new(build(&provider, store.clone(), options()));
    let mut rx = orchestrator.events().subscribe();

    let running = orchestrator.clone();
    let turn = tokio::spawn(async move { running.send_message("tell me a story", false).await });

    wait_for_stream_start(&mut rx).await;
    assert!(orchestrator.cancel_current_turn());
    let result = turn.await.unwrap();
    assert!(matches!(result, Err(OrchestratorError::Cancelled)));

    let events = drain(&mut rx);
    assert_eq!(count(&events, |e| matches!(e, CompanionEvent::StreamError { .. })), 1);
    assert_eq!(count(&events, |e| matches!(e, CompanionEvent::StreamComplete { .. })), 0);
    assert!(matches!(
        events.last(),
        Some(CompanionEvent::TurnCompleted { success: false, .. })
    ));
    assert!(store.messages("lumi").is_empty());
    assert!(!orchestrator.cancel_current_turn());
}

#[tokio::test]
async fn failed_write_leaves_memory_untouched() {
    let provider = ScriptedProvider::new().stream_ok(REPLY);
    let store = Arc::new(MemoryStore::new());
    store.fail_writes(true);
    let orchestrator = build(&provider, store.clone(), options());

    let result = orchestrator.send_message("hello again", false).await;
    assert!(matches!(result, Err(OrchestratorError::Persistence(_))));

    let snapshot = orchestrator.snapshot().await.unwrap();
    assert_eq!(snapshot.message_count, 0);
    assert_eq!(snapshot.relationship.affection.value(), 50);
    assert!(snapshot.first_contact);
}

#[tokio::test]
async fn failed_relationship_write_keeps_the_exchange_off_disk() {
    let provider = ScriptedProvider::new().stream_ok(REPLY);
    let store = Arc::new(MemoryStore::new());
    store.fail_relationship_writes(true);
    let orchestrator = build(&provider, store.clone(), options());

    let result = orchestrator.send_message("hello again", false).await;
    assert!(matches!(result, Err(OrchestratorError::Persistence(_))));

    assert!(store.messages("lumi").is_empty());
    assert!(store.relationship("lumi").is_none());
    let snapshot = orchestrator.snapshot().await.unwrap();
    assert_eq!(snapshot.message_count, 0);
    assert!(snapshot.first_contact);

    let reopened = build(&ScriptedProvider::new(), store, options());
    let snapshot = reopened.snapshot().await.unwrap();
    assert_eq!(snapshot.message_count, 0);
    assert!(snapshot.first_contact);
    assert_eq!(snapshot.relationship.affection.value(), 50);
}

#[tokio::test]
async fn duplicate_input_is_debounced() {
    let provider = ScriptedProvider::new().stream_ok(REPLY);
    let orchestrator = build(&provider, Arc::new(MemoryStore::new()), options());

    orchestrator.send_message("good morning", false).await.unwrap();
    let again = orchestrator.send_message("  good morning ", false).await;

    assert!(matches!(again, Err(OrchestratorError::Debounced)));
    assert_eq!(provider.requests().len(), 1);
}

#[tokio::test]
async fn empty_input_is_rejected() {
    let provider = ScriptedProvider::new();
    let orchestrator = build(&provider, Arc::new(MemoryStore::new()), options());
    assert!(matches!(
        orchestrator.send_message("   ", false).await,
        Err(OrchestratorError::EmptyInput)
    ));
    assert!(provider.requests().is_empty());
}

#[tokio::test]
async fn triggers_are_refused_while_a_turn_runs() {
    let provider = ScriptedProvider::new().stream_hang(HANGING);
    let orchestrator = Arc::new(build(&provider, Arc::new(MemoryStore::new()), options()));
    let mut rx = orchestrator.events().subscribe();

    let running = orchestrator.clone();
    let turn = tokio::spawn(async move { running.send_message("what's new", false).await });
    wait_for_stream_start(&mut rx).await;

    let fired = FiredTrigger {
        trigger_id: "idle".into(),
        action: TriggerAction::ChitChat,
        priority: 30,
    };
    assert!(matches!(
        orchestrator.deliver_trigger(&fired).await,
        Err(OrchestratorError::Busy)
    ));

    orchestrator.cancel_current_turn();
    turn.await.unwrap().unwrap_err();
    let events = drain(&mut rx);
    assert_eq!(count(&events, |e| matches!(e, CompanionEvent::TriggerFired { .. })), 0);
}

#[tokio::test]
async fn trigger_turn_is_recorded_as_a_system_event() {
    let provider = ScriptedProvider::new().stream_ok(REPLY);
    let store = Arc::new(MemoryStore::new());
    let orchestrator = build(&provider, store.clone(), options());
    let mut rx = orchestrator.events().subscribe();

    let fired = FiredTrigger {
        trigger_id: "time_of_day".into(),
        action: TriggerAction::Say("It's lunch time.".into()),
        priority: 50,
    };
    let response = orchestrator.deliver_trigger(&fired).await.unwrap();
    assert!(response.is_success());

    let request = &provider.requests()[0];
    assert_eq!(request.messages.last().unwrap().content, "[event] It's lunch time.");

    let stored = store.messages("lumi");
    assert_eq!(stored[0].kind(), MessageKind::System);
    assert!(matches!(
        drain(&mut rx).first(),
        Some(CompanionEvent::TriggerFired { priority: 50, .. })
    ));
}

#[tokio::test]
async fn greeting_differs_after_first_contact() {
    let provider = ScriptedProvider::new().stream_ok(REPLY).stream_ok(REPLY);
    let orchestrator = build(&provider, Arc::new(MemoryStore::new()), options());

    assert!(orchestrator.is_first_contact().await.unwrap());
    orchestrator.greet().await.unwrap();
    assert!(!orchestrator.is_first_contact().await.unwrap());
    orchestrator.greet().await.unwrap();

    let requests = provider.requests();
    let first = &requests[0].messages.last().unwrap().content;
    let second = &requests[1].messages.last().unwrap().content;
    assert!(first.contains("first time"));
    assert!(second.contains("already know"));
}

#[tokio::test]
async fn chit_chat_picks_an_eligible_topic() {
    let provider = ScriptedProvider::new().stream_ok(REPLY);
    let orchestrator = build(&provider, Arc::new(MemoryStore::new()), options());

    orchestrator.chit_chat().await.unwrap();

    let prompt = provider.requests()[0].messages.last().unwrap().content.clone();
    assert!(prompt.contains("Start a conversation about this"));
    // Requires affection 70, the session starts at 50.
    assert!(!prompt.contains("secret"));
}

#[tokio::test]
async fn old_messages_are_summarized_in_the_background() {
    let provider = ScriptedProvider::new()
        .stream_ok(REPLY)
        .stream_ok(REPLY)
        .complete_ok("They introduced themselves twice.")
        .stream_ok(REPLY);
    let store = Arc::new(MemoryStore::new());
    let mut options = options();
    options.conversation.summary_threshold = 3;
    options.conversation.min_summarizable = 1;
    options.conversation.keep_recent = 2;
    let orchestrator = build(&provider, store.clone(), options);
    let mut rx = orchestrator.events().subscribe();

    orchestrator.send_message("one", false).await.unwrap();
    orchestrator.send_message("two", false).await.unwrap();

    loop {
        if let CompanionEvent::SummaryCreated { message_count, .. } = rx.recv().await.unwrap() {
            assert_eq!(message_count, 2);
            break;
        }
    }
    let summaries = store.summaries("lumi");
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].covers_until, Some(store.messages("lumi")[1].id));

    orchestrator.send_message("three", false).await.unwrap();

    let last_stream = provider
        .requests()
        .into_iter()
        .filter(|r| r.stream)
        .last()
        .unwrap();
    let system = last_stream.system.unwrap();
    assert!(system.contains("<conversation_summary>"));
    assert!(system.contains("They introduced themselves twice."));
    // Summarized turns no longer appear verbatim.
    assert!(!last_stream.messages.iter().any(|m| m.content == "one"));

    let snapshot = orchestrator.snapshot().await.unwrap();
    assert_eq!(snapshot.summary.as_deref(), Some("They introduced themselves twice."));
    assert_eq!(snapshot.unsummarized, 4);
}

#[tokio::test]
async fn tool_results_reach_the_response_prompt() {
    let provider = ScriptedProvider::new()
        .complete_tool_calls(vec![ToolCall {
            id: "call_1".into(),
            name: "current_time".into(),
            arguments: json!({}),
        }])
        .complete_ok("It is the afternoon.")
        .stream_ok(REPLY);
    let mut options = options();
    options.tools = ToolRegistry::new().with(CurrentTimeTool);
    let orchestrator = build(&provider, Arc::new(MemoryStore::new()), options);
    let mut rx = orchestrator.events().subscribe();

    let response = orchestrator.send_message("what time is it now?", false).await.unwrap();
    assert!(response.is_success());

    let requests = provider.requests();
    assert_eq!(requests.len(), 3);
    assert!(!requests[0].tools.is_empty());
    let system = requests[2].system.clone().unwrap();
    assert!(system.contains("<tool_results>"));
    assert!(system.contains("- current_time:"));

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        CompanionEvent::ToolInvoked { tool, success: true, .. } if tool == "current_time"
    )));
}

#[tokio::test]
async fn small_talk_skips_the_tool_phase() {
    let provider = ScriptedProvider::new().stream_ok(REPLY);
    let mut options = options();
    options.tools = ToolRegistry::new().with(CurrentTimeTool);
    let orchestrator = build(&provider, Arc::new(MemoryStore::new()), options);

    orchestrator.send_message("thanks", false).await.unwrap();

    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].stream);
}

#[tokio::test]
async fn greeting_with_tools_registered_goes_straight_to_the_reply() {
    let provider = ScriptedProvider::new().stream_ok(REPLY);
    let store = Arc::new(MemoryStore::new());
    let mut options = options();
    options.tools = ToolRegistry::new().with(CurrentTimeTool);
    let orchestrator = build(&provider, store.clone(), options);

    let response = orchestrator.send_message("hi", false).await.unwrap();

    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].stream);
    assert!(requests[0].tools.is_empty());

    assert_eq!(response.relationship.affection.value(), 53);
    assert_eq!(response.relationship.attitude.as_str(), "neutral");
    assert_eq!(store.messages("lumi").len(), 2);
    let saved = store.relationship("lumi").unwrap();
    assert_eq!(saved.affection.value(), 53);
    assert_eq!(saved.attitude.as_str(), "neutral");
}

#[tokio::test]
async fn profile_tool_call_updates_the_same_turn_prompt() {
    let provider = ScriptedProvider::new()
        .complete_tool_calls(vec![ToolCall {
            id: "call_1".into(),
            name: "update_user_profile".into(),
            arguments: json!({"nickname": "Sam"}),
        }])
        .complete_ok("noted")
        .stream_ok(REPLY)
        .stream_ok(REPLY);
    let store = Arc::new(MemoryStore::new());
    let mut options = options();
    options.tools = ToolRegistry::new().with(UpdateUserProfileTool::new(store.clone()));
    let orchestrator = build(&provider, store.clone(), options);

    orchestrator
        .send_message("please call me Sam from now on", false)
        .await
        .unwrap();
    orchestrator.send_message("thanks", false).await.unwrap();

    let requests = provider.requests();
    assert_eq!(requests.len(), 4);
    for request in [&requests[2], &requests[3]] {
        let system = request.system.clone().unwrap();
        assert!(system.contains("Call the user Sam."), "{system}");
    }
    let snapshot = orchestrator.snapshot().await.unwrap();
    assert_eq!(snapshot.profile.nickname.as_deref(), Some("Sam"));
}

#[tokio::test]
async fn profile_extraction_runs_on_its_interval() {
    let provider = ScriptedProvider::new()
        .stream_ok(REPLY)
        .complete_tool_calls(vec![ToolCall {
            id: "call_1".into(),
            name: "update_user_profile".into(),
            arguments: json!({"facts": ["drinks green tea"]}),
        }])
        .complete_ok("recorded");
    let store = Arc::new(MemoryStore::new());
    let mut options = options();
    options.conversation.profile_update_interval = 1;
    let orchestrator = build(&provider, store.clone(), options);

    orchestrator.send_message("I only drink green tea", false).await.unwrap();

    let mut facts = Vec::new();
    for _ in 0..50 {
        facts = store.load_profile().await.unwrap().facts;
        if !facts.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(facts, vec!["drinks green tea".to_string()]);
}

#[tokio::test]
async fn reset_keeps_the_relationship() {
    let provider = ScriptedProvider::new().stream_ok(REPLY);
    let store = Arc::new(MemoryStore::new());
    let orchestrator = build(&provider, store.clone(), options());
    orchestrator.send_message("hello", false).await.unwrap();

    orchestrator.reset_history().await.unwrap();

    assert!(store.messages("lumi").is_empty());
    let snapshot = orchestrator.snapshot().await.unwrap();
    assert_eq!(snapshot.message_count, 0);
    assert_eq!(snapshot.relationship.affection.value(), 53);
    assert!(orchestrator.history().await.unwrap().is_empty());
}

#[tokio::test]
async fn session_is_restored_from_the_store() {
    let provider = ScriptedProvider::new().stream_ok(REPLY);
    let store = Arc::new(MemoryStore::new());
    build(&provider, store.clone(), options())
        .send_message("remember me", false)
        .await
        .unwrap();

    let reopened = build(&ScriptedProvider::new(), store, options());
    let snapshot = reopened.snapshot().await.unwrap();
    assert!(!snapshot.first_contact);
    assert_eq!(snapshot.message_count, 2);
    assert_eq!(snapshot.relationship.affection.value(), 53);
}

#[test]
fn invalid_configuration_is_rejected() {
    let mut options = options();
    options.conversation.max_trial = 0;
    let result = ConversationOrchestrator::new(
        CharacterSetting::builtin(),
        Arc::new(MemoryStore::new()),
        BoxLlmProvider::new(ScriptedProvider::new()),
        options,
        EventBus::default(),
    );
    assert!(matches!(result, Err(OrchestratorError::Configuration(_))));
}
