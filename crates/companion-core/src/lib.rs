//! Conversation engine core for the companion.
//!
//! This crate defines the "ports" (repository, generator, and tool traits)
//! that the infrastructure layer implements, plus every piece of turn logic:
//! response parsing, the in-memory chat history, tool dispatch, response
//! generation, the per-character orchestrator, and the trigger scheduler.
//! It depends only on `companion-types` -- never on `companion-infra` or any
//! database/IO crate.

pub mod agent;
pub mod event;
pub mod history;
pub mod llm;
pub mod orchestrator;
pub mod parser;
pub mod scheduler;
pub mod tool;

#[cfg(test)]
pub(crate) mod testing;
