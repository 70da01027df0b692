//! `companion reset`: forget a character's conversation.
//!
//! Affection and the user profile are kept; only messages and summaries go.

use anyhow::Result;
use console::style;
use dialoguer::Confirm;

use crate::state::AppState;

pub async fn reset(state: &AppState, character: &str, force: bool, json: bool) -> Result<()> {
    let orchestrator = state.orchestrator(character)?;
    let name = orchestrator.character().name.clone();

    if !force && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Erase the whole conversation with {}?",
                style(&name).red().bold()
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    orchestrator.reset_history().await?;

    if json {
        let result = serde_json::json!({
            "character": orchestrator.character().id,
            "reset": true,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!();
        println!(
            "  {} Conversation with {} cleared.",
            style("✓").green().bold(),
            style(&name).cyan()
        );
        println!();
    }
    Ok(())
}
