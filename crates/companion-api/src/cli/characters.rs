//! `companion characters`: list the configured characters.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use crate::state::AppState;

pub fn characters(state: &AppState, json: bool) -> Result<()> {
    let characters = &state.config.characters;

    if json {
        let rows: Vec<_> = characters
            .iter()
            .map(|c| {
                serde_json::json!({
                    "id": c.id,
                    "name": c.name,
                    "personality": c.personality,
                    "topics": c.topics.len(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if characters.is_empty() {
        println!();
        println!(
            "  {} No characters configured. Add a [[characters]] entry to {}.",
            style("!").yellow().bold(),
            style(state.data_dir.join("config.toml").display()).dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Id").fg(Color::White),
        Cell::new("Name").fg(Color::White),
        Cell::new("Personality").fg(Color::White),
        Cell::new("Topics").fg(Color::White),
    ]);

    for character in characters {
        table.add_row(vec![
            Cell::new(&character.id).fg(Color::Cyan),
            Cell::new(&character.name),
            Cell::new(truncate(&character.personality, 60)),
            Cell::new(character.topics.len()),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

/// Shorten `text` to at most `max` characters, marking the cut with `...`.
pub fn truncate(text: &str, max: usize) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= max {
        return single_line;
    }
    let kept: String = single_line.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}
