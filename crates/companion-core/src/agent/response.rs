//! Response agent: turns a [`ResponseContext`] into the character's raw
//! reply text, streamed when possible.
//!
//! Parsing and retry policy belong to the orchestrator; this agent only
//! assembles the request and talks to the generator. GenAI spans wrap every
//! call, including the lifetime of a stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use pin_project_lite::pin_project;
use tracing::{Instrument, info_span};

use companion_types::llm::{CompletionRequest, LlmError, StreamEvent};

use super::prompt::ResponseContext;
use crate::llm::BoxLlmProvider;

/// Text fragments of a streamed reply, in arrival order.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send + 'static>>;

/// Sampling settings for reply generation.
#[derive(Debug, Clone)]
pub struct ResponseSettings {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ResponseAgent {
    provider: BoxLlmProvider,
    settings: ResponseSettings,
}

impl ResponseAgent {
    pub fn new(provider: BoxLlmProvider, settings: ResponseSettings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &ResponseSettings {
        &self.settings
    }

    pub fn request(&self, context: &ResponseContext, stream: bool) -> CompletionRequest {
        let mut request = CompletionRequest::new(
            self.settings.model.clone(),
            Some(context.system_prompt()),
            context.messages(),
        );
        request.temperature = Some(self.settings.temperature);
        request.max_tokens = self.settings.max_tokens;
        request.stream = stream;
        request
    }

    /// Stream the reply as text fragments.
    ///
    /// Non-text events (connection, usage, stop reason) are dropped.
    pub fn stream(&self, context: &ResponseContext) -> FragmentStream {
        let request = self.request(context, true);
        let span = info_span!(
            "gen_ai.stream",
            gen_ai.system = self.provider.name(),
            gen_ai.request.model = %request.model,
            gen_ai.request.max_tokens = request.max_tokens,
            gen_ai.request.temperature = ?request.temperature,
            gen_ai.request.stream = true,
        );

        let fragments = self.provider.stream(request).filter_map(|event| async move {
            match event {
                Ok(StreamEvent::TextDelta { text, .. }) => Some(Ok(text)),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            }
        });

        Box::pin(StreamInSpan {
            inner: fragments,
            span,
        })
    }

    /// Generate the whole reply in one call.
    pub async fn invoke(&self, context: &ResponseContext) -> Result<String, LlmError> {
        let request = self.request(context, false);
        let span = info_span!(
            "gen_ai.complete",
            gen_ai.system = self.provider.name(),
            gen_ai.request.model = %request.model,
            gen_ai.request.max_tokens = request.max_tokens,
            gen_ai.request.temperature = ?request.temperature,
            gen_ai.request.stream = false,
        );
        let response = self.provider.complete(&request).instrument(span).await?;
        Ok(response.content)
    }
}

pin_project! {
    /// Keeps a span entered while the inner stream is polled, so the span
    /// lives as long as the stream rather than ending at creation.
    struct StreamInSpan<S> {
        #[pin]
        inner: S,
        span: tracing::Span,
    }
}

impl<S: Stream> Stream for StreamInSpan<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let _enter = this.span.enter();
        this.inner.poll_next(cx)
    }
}
