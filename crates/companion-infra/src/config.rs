//! Configuration loader for the companion engine.
//!
//! Reads `config.toml` from the data directory and deserializes it into
//! [`CompanionConfig`]. Falls back to defaults when the file is missing or
//! malformed.

use std::path::{Path, PathBuf};

use companion_types::config::CompanionConfig;

/// File name of the configuration inside the data directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "COMPANION_DATA_DIR";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `COMPANION_DATA_DIR` environment variable
/// 2. Platform data directory (e.g., `~/.local/share/companion` on Linux)
/// 3. `~/.companion`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }

    if let Some(data) = dirs::data_dir() {
        return data.join("companion");
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".companion");
    }

    // Last resort: current directory
    PathBuf::from(".companion")
}

/// Load configuration from `{data_dir}/config.toml`.
///
/// - Missing file: returns [`CompanionConfig::default()`].
/// - Unreadable or unparsable file: logs a warning and returns the default.
pub async fn load_config(data_dir: &Path) -> CompanionConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return CompanionConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return CompanionConfig::default();
        }
    };

    match toml::from_str::<CompanionConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            CompanionConfig::default()
        }
    }
}

/// Write `config` to `{data_dir}/config.toml`, creating the directory.
pub async fn save_config(data_dir: &Path, config: &CompanionConfig) -> Result<PathBuf, ConfigError> {
    let config_path = data_dir.join(CONFIG_FILE);
    let content = toml::to_string_pretty(config)?;

    tokio::fs::create_dir_all(data_dir)
        .await
        .map_err(|source| ConfigError::Io {
            path: data_dir.to_path_buf(),
            source,
        })?;
    tokio::fs::write(&config_path, content)
        .await
        .map_err(|source| ConfigError::Io {
            path: config_path.clone(),
            source,
        })?;

    Ok(config_path)
}
