//! OpenAI SSE stream to [`StreamEvent`] adapter.
//!
//! The response body is split into server-sent events by
//! `eventsource-stream`; each `data:` payload is one [`ChatChunk`] and the
//! literal `[DONE]` ends the stream.
//!
//! Tool call arguments arrive as partial JSON fragments across multiple
//! chunks (keyed by tool call index). They are accumulated and emitted as
//! [`StreamEvent::ToolUseComplete`] when a finish_reason arrives or the
//! stream ends.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::pin::Pin;

use eventsource_stream::Event;
use futures_util::{Stream, StreamExt};

use companion_types::llm::{LlmError, StreamEvent};

use super::types::{ChatChunk, map_finish_reason, parse_arguments};

/// Accumulates partial fragments for one streamed tool call.
#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    json_buffer: String,
}

/// Drain accumulated tool calls in index order.
fn drain_tool_calls(accumulators: &mut BTreeMap<u32, ToolCallAccumulator>) -> Vec<StreamEvent> {
    std::mem::take(accumulators)
        .into_values()
        .map(|acc| StreamEvent::ToolUseComplete {
            input: parse_arguments(&acc.json_buffer),
            id: acc.id,
            name: acc.name,
        })
        .collect()
}

/// Map a stream of SSE events to a stream of [`StreamEvent`]s.
///
/// The returned stream emits:
/// 1. `Connected` on entry
/// 2. `TextDelta` for each non-empty content fragment
/// 3. `ToolUseComplete` once a tool call is fully assembled
/// 4. `MessageDelta` with the stop reason
/// 5. `Usage` when the server reports it
/// 6. `Done` at `[DONE]` or end of body
///
/// A transport error or an undecodable payload ends the stream with an error.
pub fn map_sse_stream<S, E>(
    events: S,
) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>>
where
    S: Stream<Item = Result<Event, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(async_stream::try_stream! {
        yield StreamEvent::Connected;

        let mut tool_accumulators: BTreeMap<u32, ToolCallAccumulator> = BTreeMap::new();
        let mut events = Box::pin(events);

        while let Some(event) = events.next().await {
            let event = event.map_err(|e| LlmError::Stream(e.to_string()))?;
            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                break;
            }

            let chunk: ChatChunk = serde_json::from_str(data).map_err(|e| {
                LlmError::Deserialization(format!("invalid stream chunk: {e}"))
            })?;

            for choice in chunk.choices {
                if let Some(text) = choice.delta.content {
                    if !text.is_empty() {
                        yield StreamEvent::TextDelta { index: 0, text };
                    }
                }

                for delta in choice.delta.tool_calls {
                    let acc = tool_accumulators.entry(delta.index).or_default();
                    if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
                        acc.id = id;
                    }
                    if let Some(function) = delta.function {
                        if let Some(name) = function.name.filter(|n| !n.is_empty()) {
                            acc.name = name;
                        }
                        if let Some(args) = function.arguments {
                            acc.json_buffer.push_str(&args);
                        }
                    }
                }

                if let Some(reason) = choice.finish_reason {
                    for tool_event in drain_tool_calls(&mut tool_accumulators) {
                        yield tool_event;
                    }
                    yield StreamEvent::MessageDelta {
                        stop_reason: map_finish_reason(&reason),
                    };
                }
            }

            // With include_usage the last chunk carries usage and no choices.
            if let Some(usage) = chunk.usage {
                yield StreamEvent::Usage(usage.into());
            }
        }

        // Servers that end without a finish_reason still owe their tool calls.
        for tool_event in drain_tool_calls(&mut tool_accumulators) {
            yield tool_event;
        }
        yield StreamEvent::Done;
    })
}
