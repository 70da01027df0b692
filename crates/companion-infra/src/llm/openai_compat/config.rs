//! Configuration types and per-preset defaults for OpenAI-compatible providers.
//!
//! Each preset that speaks the OpenAI chat completions protocol gets a factory
//! function returning an [`OpenAiCompatConfig`] with the correct base URL,
//! capabilities, and key requirement.

use secrecy::SecretString;

use companion_types::config::GeneratorConfig;
use companion_types::llm::{LlmError, ProviderCapabilities, ProviderPreset};

/// Configuration for an OpenAI-compatible provider.
///
/// Used to construct an [`super::OpenAiCompatibleProvider`].
pub struct OpenAiCompatConfig {
    /// Human-readable provider name (e.g., "openai", "deepseek").
    pub provider_name: String,
    /// Base URL for the API, without the trailing `/chat/completions`.
    pub base_url: String,
    /// API key; `None` when not configured.
    pub api_key: Option<SecretString>,
    /// Whether calls without a key fail with `ApiKeyNotDefined`.
    pub requires_key: bool,
    /// Model used when a request does not name one.
    pub model: String,
    pub capabilities: ProviderCapabilities,
}

/// OpenAI default configuration.
///
/// Base URL: `https://api.openai.com/v1`; 128K context, 16K output.
pub fn openai_defaults(api_key: Option<SecretString>, model: &str) -> OpenAiCompatConfig {
    OpenAiCompatConfig {
        provider_name: "openai".into(),
        base_url: "https://api.openai.com/v1".into(),
        api_key,
        requires_key: true,
        model: model.into(),
        capabilities: ProviderCapabilities {
            streaming: true,
            tool_calling: true,
            max_context_tokens: 128_000,
            max_output_tokens: 16_384,
        },
    }
}

/// DeepSeek default configuration.
///
/// Base URL: `https://api.deepseek.com/v1`; 64K context, 8K output.
pub fn deepseek_defaults(api_key: Option<SecretString>, model: &str) -> OpenAiCompatConfig {
    OpenAiCompatConfig {
        provider_name: "deepseek".into(),
        base_url: "https://api.deepseek.com/v1".into(),
        api_key,
        requires_key: true,
        model: model.into(),
        capabilities: ProviderCapabilities {
            streaming: true,
            tool_calling: true,
            max_context_tokens: 64_000,
            max_output_tokens: 8_192,
        },
    }
}

/// Local Ollama server through its OpenAI-compatible endpoint.
///
/// Base URL: `http://localhost:11434/v1`. No key required.
pub fn ollama_defaults(model: &str) -> OpenAiCompatConfig {
    OpenAiCompatConfig {
        provider_name: "ollama".into(),
        base_url: "http://localhost:11434/v1".into(),
        api_key: None,
        requires_key: false,
        model: model.into(),
        capabilities: ProviderCapabilities {
            streaming: true,
            tool_calling: true,
            max_context_tokens: 32_768,
            max_output_tokens: 4_096,
        },
    }
}

/// Build the provider configuration for a `[generator]` section.
///
/// `base_url` in the section overrides the preset's URL. The `custom`
/// preset has no URL of its own, so it fails with `InvalidRequest` when
/// none is configured. A custom endpoint sends the key when one is set but
/// never requires it.
pub fn from_generator_config(
    generator: &GeneratorConfig,
    api_key: Option<SecretString>,
) -> Result<OpenAiCompatConfig, LlmError> {
    let mut config = match generator.provider {
        ProviderPreset::OpenAi => openai_defaults(api_key, &generator.model),
        ProviderPreset::DeepSeek => deepseek_defaults(api_key, &generator.model),
        ProviderPreset::Ollama => ollama_defaults(&generator.model),
        ProviderPreset::Custom => {
            let base_url = generator.base_url.as_deref().ok_or_else(|| {
                LlmError::InvalidRequest("the custom provider needs a base_url".into())
            })?;
            OpenAiCompatConfig {
                provider_name: "custom".into(),
                base_url: base_url.to_string(),
                api_key,
                requires_key: false,
                model: generator.model.clone(),
                capabilities: ProviderCapabilities {
                    streaming: true,
                    tool_calling: true,
                    max_context_tokens: 32_768,
                    max_output_tokens: 4_096,
                },
            }
        }
    };

    if let Some(base_url) = generator.base_url.as_deref() {
        config.base_url = base_url.to_string();
    }
    config.base_url = config.base_url.trim_end_matches('/').to_string();
    Ok(config)
}
