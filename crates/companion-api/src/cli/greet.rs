//! `companion greet`: one greeting turn, printed when complete.

use std::time::Duration;

use anyhow::Result;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use super::chat::renderer::{EventPrinter, describe_failure};
use crate::state::AppState;

pub async fn greet(state: &AppState, character: &str, json: bool, quiet: bool) -> Result<()> {
    let orchestrator = state.orchestrator(character)?;

    let spinner = if json || quiet {
        ProgressBar::hidden()
    } else {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(format!("{} is thinking...", orchestrator.character().name));
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner
    };

    let result = orchestrator.greet().await;
    spinner.finish_and_clear();
    let response = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let mut printer = EventPrinter::new(std::io::stdout(), orchestrator.character().name.clone());
    println!();
    printer.print_response(&response)?;
    if let Some(failure) = &response.failure {
        printer.note(style(describe_failure(failure, state.key_hint())).yellow())?;
    } else if !quiet && response.affection_delta != 0 {
        printer.note(
            style(format!(
                "affection {} ({:+}) {}",
                response.relationship.affection.value(),
                response.affection_delta,
                response.relationship.attitude.as_str()
            ))
            .dim(),
        )?;
    }
    println!();
    Ok(())
}
