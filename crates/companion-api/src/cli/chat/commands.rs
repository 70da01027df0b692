//! Slash commands available inside `companion chat`.

use std::io::{self, Write};

use console::style;

#[derive(Debug, PartialEq, Eq)]
pub enum ChatCommand {
    Help,
    /// Say goodbye, then leave.
    Bye,
    /// Pretend the window came back from the system tray.
    Tray,
    Status,
    /// Clear the conversation; affection is kept.
    Reset,
    /// Leave without a farewell.
    Exit,
    Unknown(String),
}

/// Parse user input as a slash command; `None` for ordinary messages.
pub fn parse(input: &str) -> Option<ChatCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let cmd = trimmed
        .split_whitespace()
        .next()
        .unwrap_or(trimmed)
        .to_lowercase();

    Some(match cmd.as_str() {
        "/help" | "/h" | "/?" => ChatCommand::Help,
        "/bye" => ChatCommand::Bye,
        "/tray" => ChatCommand::Tray,
        "/status" => ChatCommand::Status,
        "/reset" => ChatCommand::Reset,
        "/exit" | "/quit" | "/q" => ChatCommand::Exit,
        _ => ChatCommand::Unknown(cmd),
    })
}

pub fn print_help(out: &mut impl Write) -> io::Result<()> {
    let rows = [
        ("/help", "Show this help message"),
        ("/bye", "Say goodbye and leave"),
        ("/tray", "Simulate restoring the window from the tray"),
        ("/status", "Show affection, attitude and history size"),
        ("/reset", "Forget the conversation (affection is kept)"),
        ("/exit", "Leave without saying goodbye"),
    ];

    writeln!(out)?;
    writeln!(out, "  {}", style("Available commands:").bold())?;
    writeln!(out)?;
    for (name, help) in rows {
        writeln!(out, "  {:<9} {}", style(name).cyan(), help)?;
    }
    writeln!(out)?;
    writeln!(
        out,
        "  {}",
        style("Ctrl+C cancels a reply in progress, Ctrl+D leaves.").dim()
    )?;
    writeln!(out)?;
    Ok(())
}
