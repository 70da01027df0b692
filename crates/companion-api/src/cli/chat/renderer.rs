//! Turns orchestrator events into terminal output.
//!
//! Text arrives as `Chunk` events and is written as-is, flushing after every
//! event so partial lines show up while the reply is still streaming.

use std::io::{self, Write};

use console::style;

use companion_types::chat::{CharacterResponse, TurnErrorKind, TurnFailure};
use companion_types::event::CompanionEvent;

pub struct EventPrinter<W> {
    out: W,
    character_name: String,
    mid_line: bool,
}

impl<W: Write> EventPrinter<W> {
    pub fn new(out: W, character_name: impl Into<String>) -> Self {
        Self {
            out,
            character_name: character_name.into(),
            mid_line: false,
        }
    }

    pub fn handle(&mut self, event: &CompanionEvent) -> io::Result<()> {
        match event {
            CompanionEvent::StreamStart { .. } => {
                self.end_line()?;
                write!(
                    self.out,
                    "  {} ",
                    style(format!("{} >", self.character_name)).cyan().bold()
                )?;
                self.mid_line = true;
            }
            CompanionEvent::EmoticonParsed { emoticon, .. } => {
                write!(self.out, "{} ", style(format!("({emoticon})")).dim())?;
                self.mid_line = true;
            }
            CompanionEvent::Chunk { text, .. } => {
                write!(self.out, "{text}")?;
                self.mid_line = !text.ends_with('\n');
            }
            CompanionEvent::StreamComplete { .. } => self.end_line()?,
            CompanionEvent::StreamError { error, .. } => {
                self.end_line()?;
                writeln!(self.out, "  {}", style(format!("~ {error}")).yellow().dim())?;
            }
            CompanionEvent::RelationshipChanged {
                affection,
                attitude,
                delta,
                ..
            } if *delta != 0 => {
                self.end_line()?;
                let change = if *delta > 0 {
                    style(format!("+{delta}")).green()
                } else {
                    style(delta.to_string()).red()
                };
                writeln!(
                    self.out,
                    "  {} {} ({}) {}",
                    style("affection").dim(),
                    affection,
                    change,
                    style(attitude).dim()
                )?;
            }
            CompanionEvent::ToolInvoked { tool, success, .. } => {
                self.end_line()?;
                let mark = if *success { "used" } else { "failed to use" };
                writeln!(self.out, "  {}", style(format!("~ {mark} {tool}")).dim())?;
            }
            CompanionEvent::RelationshipChanged { .. }
            | CompanionEvent::SummaryCreated { .. }
            | CompanionEvent::TurnCompleted { .. }
            | CompanionEvent::TriggerFired { .. } => {}
        }
        self.out.flush()
    }

    /// Print a reply that did not arrive through the stream (fallbacks).
    pub fn print_response(&mut self, response: &CharacterResponse) -> io::Result<()> {
        self.end_line()?;
        writeln!(
            self.out,
            "  {} {} {}",
            style(format!("{} >", self.character_name)).cyan().bold(),
            style(format!("({})", response.emoticon)).dim(),
            response.message
        )?;
        self.out.flush()
    }

    /// Write a status line outside of any reply.
    pub fn note(&mut self, text: impl std::fmt::Display) -> io::Result<()> {
        self.end_line()?;
        writeln!(self.out, "  {text}")?;
        self.out.flush()
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.out
    }

    fn end_line(&mut self) -> io::Result<()> {
        if self.mid_line {
            writeln!(self.out)?;
            self.mid_line = false;
        }
        Ok(())
    }
}

/// Human explanation for a turn that ended with a fallback reply.
pub fn describe_failure(failure: &TurnFailure, key_hint: Option<&str>) -> String {
    match failure.error_type {
        TurnErrorKind::ApiKeyNotDefined => match key_hint {
            Some(env) => format!(
                "No API key configured. Set {env} or add api_key to the [generator] section of config.toml."
            ),
            None => "No API key configured for the generator.".to_string(),
        },
        TurnErrorKind::ParseError => format!(
            "The reply could not be understood after {} attempt(s).",
            failure.trials
        ),
        TurnErrorKind::UnknownError => format!(
            "The generator failed after {} attempt(s): {}",
            failure.trials, failure.detail
        ),
    }
}
