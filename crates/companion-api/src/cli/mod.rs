//! CLI command definitions for the `companion` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod characters;
pub mod chat;
pub mod greet;
pub mod history;
pub mod reset;
pub mod status;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Talk to your desktop companion from the terminal.
#[derive(Parser)]
#[command(name = "companion", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors and replies.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive conversation with a character.
    Chat {
        /// Character id (see `companion characters`).
        #[arg(default_value = "lumi")]
        character: String,

        /// Do not start the trigger scheduler (no unprompted messages).
        #[arg(long)]
        no_scheduler: bool,
    },

    /// Ask a character for a single greeting and exit.
    Greet {
        #[arg(default_value = "lumi")]
        character: String,
    },

    /// Show relationship and history state.
    Status {
        /// Limit the report to one character.
        character: Option<String>,
    },

    /// Show a character's stored chat history.
    History {
        #[arg(default_value = "lumi")]
        character: String,

        /// Number of most recent messages to show.
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// Clear a character's chat history and summaries.
    Reset {
        character: String,

        /// Skip the confirmation prompt.
        #[arg(short, long)]
        force: bool,
    },

    /// List the configured characters.
    #[command(alias = "ls")]
    Characters,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["companion", "status", "--json", "-vv"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Status { character: None }));
    }

    #[test]
    fn chat_defaults_to_builtin_character() {
        let cli = Cli::try_parse_from(["companion", "chat"]).unwrap();
        match cli.command {
            Commands::Chat {
                character,
                no_scheduler,
            } => {
                assert_eq!(character, "lumi");
                assert!(!no_scheduler);
            }
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn history_limit() {
        let cli = Cli::try_parse_from(["companion", "history", "kai", "-n", "5"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::History { ref character, limit: 5 } if character == "kai"
        ));
    }

    #[test]
    fn reset_requires_character() {
        assert!(Cli::try_parse_from(["companion", "reset"]).is_err());
    }
}
