//! Async line input for the chat loop.
//!
//! `rustyline_async` keeps the prompt intact while replies and unprompted
//! messages are written through its `SharedWriter`.

use rustyline_async::{Readline, ReadlineError, ReadlineEvent, SharedWriter};

#[derive(Debug, PartialEq, Eq)]
pub enum InputEvent {
    /// A submitted, trimmed, non-empty line.
    Message(String),
    /// Ctrl+D, or the terminal went away.
    Eof,
    /// Ctrl+C.
    Interrupted,
}

pub struct ChatInput {
    rl: Readline,
}

impl ChatInput {
    /// Returns the reader and the writer all chat output must go through.
    pub fn new() -> Result<(Self, SharedWriter), ReadlineError> {
        let prompt = format!("  {} ", console::style("You >").green().bold());
        let (rl, writer) = Readline::new(prompt)?;
        Ok((Self { rl }, writer))
    }

    /// Wait for the next line. Blank lines are swallowed.
    pub async fn read_line(&mut self) -> InputEvent {
        loop {
            match self.rl.readline().await {
                Ok(ReadlineEvent::Line(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    self.rl.add_history_entry(line.to_string());
                    return InputEvent::Message(line.to_string());
                }
                Ok(ReadlineEvent::Interrupted) => return InputEvent::Interrupted,
                Ok(ReadlineEvent::Eof) => return InputEvent::Eof,
                Err(e) => {
                    tracing::debug!(error = %e, "readline failed; treating as end of input");
                    return InputEvent::Eof;
                }
            }
        }
    }

    /// Flush pending output and restore the terminal.
    pub fn finish(mut self) {
        if let Err(e) = self.rl.flush() {
            tracing::debug!(error = %e, "failed to flush readline output");
        }
    }
}
