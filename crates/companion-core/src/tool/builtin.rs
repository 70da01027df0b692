//! Tools shipped with the engine.

use std::sync::Arc;

use chrono::{Local, Timelike};
use companion_types::character::ProfileUpdate;
use serde_json::json;

use crate::history::UserProfileRepository;

use super::registry::{Tool, ToolError};

/// Reports the local date and time.
#[derive(Debug, Default, Clone, Copy)]
pub struct CurrentTimeTool;

impl Tool for CurrentTimeTool {
    fn id(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the user's current local date and time."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }

    async fn invoke(&self, _arguments: serde_json::Value) -> Result<String, ToolError> {
        let now = Local::now();
        Ok(format!(
            "{} ({})",
            now.format("%A, %Y-%m-%d %H:%M"),
            crate::agent::prompt::day_period(now.hour())
        ))
    }
}

/// Id of [`UpdateUserProfileTool`].
pub const UPDATE_USER_PROFILE: &str = "update_user_profile";

/// Merges newly learned facts about the user into the stored profile.
pub struct UpdateUserProfileTool<R> {
    store: Arc<R>,
}

impl<R> UpdateUserProfileTool<R> {
    pub fn new(store: Arc<R>) -> Self {
        Self { store }
    }
}

impl<R: UserProfileRepository> Tool for UpdateUserProfileTool<R> {
    fn id(&self) -> &str {
        UPDATE_USER_PROFILE
    }

    fn description(&self) -> &str {
        "Record durable facts about the user (preferences, life details, how they want to be called). \
         Only call this for facts that are new."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "nickname": {
                    "type": "string",
                    "description": "What the user wants to be called, if they said so."
                },
                "facts": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Short standalone facts, one per entry."
                }
            }
        })
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let update: ProfileUpdate = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        if update.is_empty() {
            return Ok("nothing to record".to_string());
        }

        let mut profile = self
            .store
            .load_profile()
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        if !profile.merge(&update) {
            return Ok("profile already up to date".to_string());
        }
        self.store
            .save_profile(&profile)
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        tracing::debug!(facts = profile.facts.len(), "user profile updated");
        Ok(format!("profile updated ({} facts known)", profile.facts.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;

    #[tokio::test]
    async fn current_time_reports_a_period() {
        let out = CurrentTimeTool.invoke(json!({})).await.unwrap();
        assert!(
            ["morning", "afternoon", "evening", "night"]
                .iter()
                .any(|p| out.contains(p))
        );
    }

    #[tokio::test]
    async fn profile_tool_merges_and_persists() {
        let store = Arc::new(MemoryStore::new());
        let tool = UpdateUserProfileTool::new(store.clone());

        let out = tool
            .invoke(json!({"nickname": "Sam", "facts": ["likes jazz"]}))
            .await
            .unwrap();
        assert!(out.starts_with("profile updated"));

        let profile = store.load_profile().await.unwrap();
        assert_eq!(profile.nickname.as_deref(), Some("Sam"));
        assert_eq!(profile.facts, vec!["likes jazz".to_string()]);

        let again = tool.invoke(json!({"facts": ["Likes Jazz"]})).await.unwrap();
        assert_eq!(again, "profile already up to date");
    }

    #[tokio::test]
    async fn profile_tool_rejects_bad_arguments() {
        let tool = UpdateUserProfileTool::new(Arc::new(MemoryStore::new()));
        let err = tool.invoke(json!({"facts": "not a list"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
