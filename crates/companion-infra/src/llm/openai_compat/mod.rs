//! OpenAI-compatible generator implementation.
//!
//! A single [`OpenAiCompatibleProvider`] serves OpenAI, DeepSeek, a local
//! Ollama server and any custom endpoint speaking the chat completions
//! protocol, via configurable base URLs and preset factory functions.
//!
//! Requests go out over raw `reqwest`; streaming bodies are decoded with
//! `eventsource-stream` (see [`streaming`]).

pub mod config;
pub mod streaming;
pub mod types;

use std::pin::Pin;
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};

use companion_core::llm::LlmProvider;
use companion_types::llm::{
    CompletionRequest, CompletionResponse, LlmError, ProviderCapabilities, StopReason, StreamEvent,
};

use self::config::OpenAiCompatConfig;
use self::streaming::map_sse_stream;
use self::types::{ChatRequest, ChatResponse, ErrorEnvelope, map_finish_reason};

/// Unified provider for any OpenAI-compatible API.
///
/// # API Key Security
///
/// The key is held as a [`SecretString`] and only exposed when building the
/// `Authorization` header. The struct does NOT derive Debug.
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    provider_name: String,
    base_url: String,
    api_key: Option<SecretString>,
    requires_key: bool,
    model: String,
    capabilities: ProviderCapabilities,
}

impl OpenAiCompatibleProvider {
    /// Create a provider from a configuration.
    pub fn new(config: OpenAiCompatConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| LlmError::Provider {
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            provider_name: config.provider_name,
            base_url: config.base_url,
            api_key: config.api_key,
            requires_key: config.requires_key,
            model: config.model,
            capabilities: config.capabilities,
        })
    }

    /// Create an OpenAI provider (`https://api.openai.com/v1`).
    pub fn openai(api_key: Option<SecretString>, model: &str) -> Result<Self, LlmError> {
        Self::new(config::openai_defaults(api_key, model))
    }

    /// Create a DeepSeek provider (`https://api.deepseek.com/v1`).
    pub fn deepseek(api_key: Option<SecretString>, model: &str) -> Result<Self, LlmError> {
        Self::new(config::deepseek_defaults(api_key, model))
    }

    /// Create a provider for a local Ollama server.
    pub fn ollama(model: &str) -> Result<Self, LlmError> {
        Self::new(config::ollama_defaults(model))
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Start a POST with authentication, or fail when a required key is missing.
    fn post(&self) -> Result<reqwest::RequestBuilder, LlmError> {
        let builder = self.client.post(self.url());
        match &self.api_key {
            Some(key) => Ok(builder.bearer_auth(key.expose_secret())),
            None if self.requires_key => Err(LlmError::ApiKeyNotDefined {
                provider: self.provider_name.clone(),
            }),
            None => Ok(builder),
        }
    }
}

impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = ChatRequest::from_completion(request, &self.model, false);

        let response = self
            .post()?
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;
        let response = check_status(response).await?;

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Deserialization(format!("failed to parse response: {e}")))?;

        let choice = chat.choices.into_iter().next().ok_or_else(|| {
            LlmError::Deserialization("response contained no choices".to_string())
        })?;

        let tool_calls: Vec<_> = choice
            .message
            .tool_calls
            .into_iter()
            .map(|call| call.into_tool_call())
            .collect();

        let stop_reason = match choice.finish_reason.as_deref() {
            Some(reason) => map_finish_reason(reason),
            None if !tool_calls.is_empty() => StopReason::ToolUse,
            None => StopReason::EndTurn,
        };

        Ok(CompletionResponse {
            id: chat.id,
            content: choice.message.content.unwrap_or_default(),
            model: if chat.model.is_empty() { body.model } else { chat.model },
            stop_reason,
            usage: chat.usage.map(Into::into).unwrap_or_default(),
            tool_calls,
        })
    }

    fn stream(
        &self,
        request: CompletionRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>> {
        let body = ChatRequest::from_completion(&request, &self.model, true);
        // Fail fast on a missing key: the stream errors on its first poll.
        let builder = match self.post() {
            Ok(builder) => builder.json(&body),
            Err(e) => return Box::pin(futures_util::stream::once(async move { Err(e) })),
        };

        Box::pin(async_stream::try_stream! {
            let response = builder.send().await.map_err(map_transport_error)?;
            let response = check_status(response).await?;

            let mut inner = map_sse_stream(response.bytes_stream().eventsource());
            while let Some(event) = inner.next().await {
                match event {
                    Ok(ev) => yield ev,
                    Err(e) => Err(e)?,
                }
            }
        })
    }
}

fn map_transport_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout(300)
    } else {
        LlmError::Provider {
            message: format!("HTTP request failed: {e}"),
        }
    }
}

/// Pass successful responses through; map error statuses to [`LlmError`].
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after_ms = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| secs * 1000);
    let body = response.text().await.unwrap_or_default();
    let message = extract_error_message(&body);

    Err(match status.as_u16() {
        401 | 403 => LlmError::AuthenticationFailed,
        429 => LlmError::RateLimited { retry_after_ms },
        503 | 529 => LlmError::Overloaded(message),
        400 | 404 | 422 => LlmError::InvalidRequest(message),
        _ => LlmError::Provider {
            message: format!("HTTP {status}: {message}"),
        },
    })
}

/// Extract `error.message` from an error body, else the raw body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.to_string())
}
