//! Application state shared by every command.
//!
//! Owns the loaded configuration, the SQLite-backed store and the generator,
//! and hands out one orchestrator per character.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use dashmap::DashMap;

use companion_core::agent::ResponseSettings;
use companion_core::event::EventBus;
use companion_core::llm::BoxLlmProvider;
use companion_core::orchestrator::{ConversationOrchestrator, OrchestratorOptions};
use companion_core::tool::ToolRegistry;
use companion_core::tool::builtin::{CurrentTimeTool, UpdateUserProfileTool};
use companion_infra::config::{load_config, resolve_data_dir};
use companion_infra::llm::build_provider;
use companion_infra::secret::default_key_env;
use companion_infra::sqlite::{DatabasePool, SqliteCompanionStore, database_url};
use companion_types::character::CharacterSetting;
use companion_types::config::CompanionConfig;

pub type Orchestrator = ConversationOrchestrator<SqliteCompanionStore>;

pub struct AppState {
    pub data_dir: PathBuf,
    pub config: CompanionConfig,
    pub store: Arc<SqliteCompanionStore>,
    pub provider: BoxLlmProvider,
    orchestrators: DashMap<String, Arc<Orchestrator>>,
}

impl AppState {
    /// Resolve the data directory, load `config.toml`, open the database and
    /// build the generator.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let config = load_config(&data_dir).await;

        let url = format!("{}?mode=rwc", database_url(&data_dir));
        let pool = DatabasePool::new(&url)
            .await
            .context("failed to open the companion database")?;
        let store = Arc::new(SqliteCompanionStore::new(pool));

        let provider = build_provider(&config.generator)
            .map_err(|e| anyhow!("invalid [generator] configuration: {e}"))?;

        tracing::info!(
            data_dir = %data_dir.display(),
            provider = %config.generator.provider,
            model = %config.generator.model,
            "application state ready"
        );

        Ok(Self {
            data_dir,
            config,
            store,
            provider,
            orchestrators: DashMap::new(),
        })
    }

    /// Look up a configured character by id (case-insensitive).
    pub fn character(&self, id: &str) -> anyhow::Result<&CharacterSetting> {
        self.config.character(id).ok_or_else(|| {
            anyhow!("unknown character '{id}'. Run `companion characters` to list them.")
        })
    }

    /// Environment variable a user should set when the API key is missing.
    pub fn key_hint(&self) -> Option<&str> {
        let generator = &self.config.generator;
        generator
            .api_key_env
            .as_deref()
            .or_else(|| default_key_env(generator.provider))
    }

    /// The orchestrator for `id`, created on first use.
    pub fn orchestrator(&self, id: &str) -> anyhow::Result<Arc<Orchestrator>> {
        let character = self.character(id)?.clone();
        if let Some(existing) = self.orchestrators.get(&character.id) {
            return Ok(Arc::clone(existing.value()));
        }

        let generator = &self.config.generator;
        let options = OrchestratorOptions {
            conversation: self.config.conversation.clone(),
            response: ResponseSettings {
                model: generator.model.clone(),
                temperature: generator.temperature,
                max_tokens: generator.max_tokens,
            },
            tools: ToolRegistry::new()
                .with(CurrentTimeTool)
                .with(UpdateUserProfileTool::new(Arc::clone(&self.store))),
            user_name: self.config.user.name.clone(),
        };

        let key = character.id.clone();
        let orchestrator = ConversationOrchestrator::new(
            character,
            Arc::clone(&self.store),
            self.provider.clone(),
            options,
            EventBus::default(),
        )
        .map_err(|e| anyhow!("invalid [conversation] configuration: {e}"))?;

        let entry = self
            .orchestrators
            .entry(key)
            .or_insert_with(|| Arc::new(orchestrator));
        Ok(Arc::clone(entry.value()))
    }
}
