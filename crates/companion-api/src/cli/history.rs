//! `companion history`: the stored conversation as a table.

use anyhow::Result;
use chrono::Local;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use companion_types::chat::{ChatMessage, MessageBody};

use super::characters::truncate;
use crate::state::AppState;

pub async fn history(state: &AppState, character: &str, limit: usize, json: bool) -> Result<()> {
    let orchestrator = state.orchestrator(character)?;
    let messages = orchestrator.history().await?;
    let start = messages.len().saturating_sub(limit);
    let recent = &messages[start..];

    if json {
        println!("{}", serde_json::to_string_pretty(recent)?);
        return Ok(());
    }

    let name = &orchestrator.character().name;
    if recent.is_empty() {
        println!();
        println!("  {} No messages with {} yet.", style("i").blue().bold(), style(name).cyan());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Time").fg(Color::White),
        Cell::new("From").fg(Color::White),
        Cell::new("Mood").fg(Color::White),
        Cell::new("Message").fg(Color::White),
    ]);

    for message in recent {
        table.add_row(row(message, name));
    }

    println!();
    if start > 0 {
        println!(
            "  {}",
            style(format!("Showing the last {} of {} messages", recent.len(), messages.len())).dim()
        );
    }
    println!("{table}");
    println!();
    Ok(())
}

fn row(message: &ChatMessage, character_name: &str) -> Vec<Cell> {
    let time = message
        .created_at
        .with_timezone(&Local)
        .format("%m-%d %H:%M")
        .to_string();
    let content = truncate(&message.content, 80);

    match &message.body {
        MessageBody::User => vec![
            Cell::new(time),
            Cell::new("You").fg(Color::Green),
            Cell::new(""),
            Cell::new(content),
        ],
        MessageBody::System => vec![
            Cell::new(time),
            Cell::new("event").fg(Color::DarkGrey),
            Cell::new(""),
            Cell::new(content).fg(Color::DarkGrey),
        ],
        MessageBody::Character {
            emoticon,
            affection_delta,
        } => vec![
            Cell::new(time),
            Cell::new(character_name).fg(Color::Cyan),
            Cell::new(format!("{emoticon} {affection_delta:+}")),
            Cell::new(content),
        ],
        MessageBody::Summary { message_count, .. } => vec![
            Cell::new(time),
            Cell::new("summary").fg(Color::Yellow),
            Cell::new(format!("{message_count} msgs")),
            Cell::new(content).fg(Color::Yellow),
        ],
    }
}
