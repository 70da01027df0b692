//! API-key resolution for the text generator.
//!
//! Resolution order:
//! 1. Inline `api_key` in `[generator]`
//! 2. The configured `api_key_env` variable, or the preset's default variable
//!
//! Blank values count as absent. A missing key is not an error here; the
//! generator reports `ApiKeyNotDefined` when a turn actually needs it.

use secrecy::SecretString;

use companion_types::config::GeneratorConfig;
use companion_types::llm::ProviderPreset;

/// Default environment variable per preset. `None` for presets that need no key.
pub fn default_key_env(preset: ProviderPreset) -> Option<&'static str> {
    match preset {
        ProviderPreset::OpenAi => Some("OPENAI_API_KEY"),
        ProviderPreset::DeepSeek => Some("DEEPSEEK_API_KEY"),
        ProviderPreset::Ollama => None,
        ProviderPreset::Custom => Some("COMPANION_API_KEY"),
    }
}

/// Resolve the API key for `config`, wrapped so it never reaches logs.
pub fn resolve_api_key(config: &GeneratorConfig) -> Option<SecretString> {
    if let Some(key) = non_blank(config.api_key.as_deref()) {
        return Some(SecretString::from(key.to_string()));
    }

    let var = config
        .api_key_env
        .as_deref()
        .or_else(|| default_key_env(config.provider))?;

    // An unset or non-unicode variable is treated as absent.
    let value = std::env::var(var).ok()?;
    non_blank(Some(&value)).map(|key| SecretString::from(key.to_string()))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn inline_key_wins() {
        let config = GeneratorConfig {
            api_key: Some("sk-inline".into()),
            api_key_env: Some("COMPANION_TEST_UNUSED_KEY".into()),
            ..GeneratorConfig::default()
        };
        let key = resolve_api_key(&config).unwrap();
        assert_eq!(key.expose_secret(), "sk-inline");
    }

    #[test]
    fn configured_env_var_is_read() {
        // SAFETY: unique variable name, restored before the test ends.
        unsafe {
            std::env::set_var("COMPANION_TEST_KEY_A", "  sk-env  ");
        }
        let config = GeneratorConfig {
            api_key: Some("   ".into()),
            api_key_env: Some("COMPANION_TEST_KEY_A".into()),
            ..GeneratorConfig::default()
        };
        let key = resolve_api_key(&config).unwrap();
        assert_eq!(key.expose_secret(), "sk-env");
        unsafe {
            std::env::remove_var("COMPANION_TEST_KEY_A");
        }
    }

    #[test]
    fn missing_key_is_none() {
        let config = GeneratorConfig {
            api_key_env: Some("COMPANION_TEST_KEY_NEVER_SET".into()),
            ..GeneratorConfig::default()
        };
        assert!(resolve_api_key(&config).is_none());
    }

    #[test]
    fn ollama_needs_no_key() {
        assert_eq!(default_key_env(ProviderPreset::Ollama), None);
        let config = GeneratorConfig {
            provider: ProviderPreset::Ollama,
            ..GeneratorConfig::default()
        };
        assert!(resolve_api_key(&config).is_none());
    }
}
