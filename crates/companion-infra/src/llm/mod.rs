//! Generator implementations.
//!
//! Every supported backend speaks the OpenAI chat completions protocol, so
//! one provider covers all presets. [`build_provider`] turns a `[generator]`
//! config section into a ready [`BoxLlmProvider`].

pub mod openai_compat;

use companion_core::llm::BoxLlmProvider;
use companion_types::config::GeneratorConfig;
use companion_types::llm::LlmError;

use crate::secret::resolve_api_key;

use self::openai_compat::OpenAiCompatibleProvider;
use self::openai_compat::config::from_generator_config;

/// Create a [`BoxLlmProvider`] for the configured preset.
///
/// A missing API key is not an error here: the provider is built anyway and
/// every call reports `ApiKeyNotDefined` until a key is configured.
pub fn build_provider(generator: &GeneratorConfig) -> Result<BoxLlmProvider, LlmError> {
    let api_key = resolve_api_key(generator);
    if api_key.is_none() {
        tracing::debug!(provider = %generator.provider, "no API key resolved");
    }
    let config = from_generator_config(generator, api_key)?;
    let provider = OpenAiCompatibleProvider::new(config)?;
    Ok(BoxLlmProvider::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use companion_types::llm::{CompletionRequest, Message, ProviderPreset};

    #[tokio::test]
    async fn provider_without_key_reports_api_key_not_defined() {
        let generator = GeneratorConfig {
            provider: ProviderPreset::DeepSeek,
            model: "deepseek-chat".into(),
            api_key_env: Some("COMPANION_TEST_DEEPSEEK_KEY_UNSET".into()),
            ..GeneratorConfig::default()
        };
        let provider = build_provider(&generator).unwrap();
        assert_eq!(provider.name(), "deepseek");
        assert_eq!(provider.default_model(), "deepseek-chat");

        let request = CompletionRequest::new("", None, vec![Message::user("hi")]);
        let err = provider.complete(&request).await.unwrap_err();
        assert!(err.is_credential_error());
    }

    #[test]
    fn custom_without_base_url_is_rejected() {
        let generator = GeneratorConfig {
            provider: ProviderPreset::Custom,
            ..GeneratorConfig::default()
        };
        assert!(matches!(
            build_provider(&generator),
            Err(LlmError::InvalidRequest(_))
        ));
    }
}
