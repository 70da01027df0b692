//! `companion status`: generator settings and per-character state.

use anyhow::Result;
use console::style;

use companion_infra::secret::resolve_api_key;
use companion_types::llm::ProviderPreset;

use crate::state::AppState;

pub async fn status(state: &AppState, character: Option<&str>, json: bool) -> Result<()> {
    let ids: Vec<String> = match character {
        Some(id) => vec![state.character(id)?.id.clone()],
        None => state.config.characters.iter().map(|c| c.id.clone()).collect(),
    };

    let mut reports = Vec::with_capacity(ids.len());
    for id in &ids {
        let orchestrator = state.orchestrator(id)?;
        let snapshot = orchestrator.snapshot().await?;
        reports.push((orchestrator.character().name.clone(), id.clone(), snapshot));
    }

    let generator = &state.config.generator;
    let key_configured = resolve_api_key(generator).is_some();
    let key_required = matches!(
        generator.provider,
        ProviderPreset::OpenAi | ProviderPreset::DeepSeek
    );

    if json {
        let characters: Vec<_> = reports
            .iter()
            .map(|(name, id, snapshot)| {
                serde_json::json!({
                    "id": id,
                    "name": name,
                    "affection": snapshot.relationship.affection.value(),
                    "attitude": snapshot.relationship.attitude.as_str(),
                    "messages": snapshot.message_count,
                    "unsummarized": snapshot.unsummarized,
                    "has_summary": snapshot.summary.is_some(),
                    "first_contact": snapshot.first_contact,
                })
            })
            .collect();
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "generator": {
                "provider": generator.provider.to_string(),
                "model": generator.model,
                "api_key_configured": key_configured,
            },
            "scheduler_enabled": state.config.scheduler.enabled,
            "characters": characters,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Companion v{}",
        style("*").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!();
    println!(
        "  {}     {}",
        style("Data:").bold(),
        style(state.data_dir.display()).dim()
    );
    println!(
        "  {}    {} / {}",
        style("Model:").bold(),
        generator.provider,
        generator.model
    );
    let key_line = if key_configured {
        format!("{}", style("configured").green())
    } else if key_required {
        format!("{}", style("missing").red())
    } else {
        format!("{}", style("not required").dim())
    };
    println!("  {}  {}", style("API key:").bold(), key_line);
    println!(
        "  {} {}",
        style("Scheduler:").bold(),
        if state.config.scheduler.enabled {
            style("on").green()
        } else {
            style("off").dim()
        }
    );

    for (name, id, snapshot) in &reports {
        println!();
        println!(
            "  {} {}",
            style(name).cyan().bold(),
            style(format!("({id})")).dim()
        );
        println!(
            "    {}  {} {}",
            style("Affection:").bold(),
            affection_bar(snapshot.relationship.affection.value()),
            snapshot.relationship.affection.value()
        );
        println!(
            "    {}   {}",
            style("Attitude:").bold(),
            snapshot.relationship.attitude.as_str()
        );
        println!(
            "    {}   {} ({} not yet summarized)",
            style("Messages:").bold(),
            snapshot.message_count,
            snapshot.unsummarized
        );
        if let Some(address) = snapshot.profile.address() {
            println!("    {}    {}", style("Calls you:").bold(), address);
        }
        if snapshot.first_contact {
            println!("    {}", style("You have not met yet.").dim());
        }
    }
    println!();
    Ok(())
}

/// Ten-cell bar for a 0..=100 affection value.
pub fn affection_bar(affection: u8) -> String {
    let filled = usize::from(affection.min(100)).div_ceil(10);
    format!("{}{}", "#".repeat(filled), ".".repeat(10 - filled))
}
