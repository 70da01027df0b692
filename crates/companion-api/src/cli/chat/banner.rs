//! Welcome banner shown when a chat session starts.

use console::style;

use companion_core::orchestrator::SessionSnapshot;
use companion_types::character::CharacterSetting;

use crate::cli::status::affection_bar;

pub fn print_welcome_banner(character: &CharacterSetting, model: &str, snapshot: &SessionSnapshot) {
    let affection = snapshot.relationship.affection.value();

    println!();
    println!("  {} {}", style("*").cyan(), style(&character.name).cyan().bold());
    println!("  {}", style(&character.personality).dim());
    println!();
    println!("  {}     {}", style("Model:").bold(), style(model).dim());
    println!(
        "  {} {} {} ({})",
        style("Affection:").bold(),
        affection_bar(affection),
        affection,
        snapshot.relationship.attitude.as_str()
    );
    if snapshot.message_count > 0 {
        println!(
            "  {}   {}",
            style("History:").bold(),
            style(format!("{} messages", snapshot.message_count)).dim()
        );
    }
    println!();
    println!(
        "  {}",
        style("Type /help for commands, Ctrl+D to exit").dim()
    );
    println!("  {}", style("---").dim());
}
