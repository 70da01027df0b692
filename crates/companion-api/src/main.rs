//! Companion CLI entry point.
//!
//! Binary name: `companion`
//!
//! Parses CLI arguments, initializes tracing, opens the data directory and
//! database, then dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use companion_observe::{TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut tracing_options = TracingOptions::from_verbosity(cli.verbose);
    if cli.quiet && cli.verbose == 0 {
        tracing_options.default_directive = "error".to_string();
    }
    if let Err(e) = init_tracing(&tracing_options) {
        eprintln!("failed to initialize tracing: {e}");
    }

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "companion", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;
    let result = dispatch(&state, cli).await;

    shutdown_tracing();
    result
}

async fn dispatch(state: &AppState, cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Chat {
            character,
            no_scheduler,
        } => {
            cli::chat::loop_runner::run_chat_loop(state, &character, !no_scheduler, cli.quiet)
                .await
        }
        Commands::Greet { character } => {
            cli::greet::greet(state, &character, cli.json, cli.quiet).await
        }
        Commands::Status { character } => {
            cli::status::status(state, character.as_deref(), cli.json).await
        }
        Commands::History { character, limit } => {
            cli::history::history(state, &character, limit, cli.json).await
        }
        Commands::Reset { character, force } => {
            cli::reset::reset(state, &character, force, cli.json).await
        }
        Commands::Characters => cli::characters::characters(state, cli.json),
        Commands::Completions { .. } => Ok(()),
    }
}
