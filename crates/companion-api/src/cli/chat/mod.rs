//! Interactive chat with one character.
//!
//! Replies stream in through the orchestrator's event bus while the trigger
//! scheduler runs alongside, so the character can also speak unprompted.
//! Entry point: `loop_runner::run_chat_loop`.

pub mod banner;
pub mod commands;
pub mod input;
pub mod loop_runner;
pub mod renderer;
