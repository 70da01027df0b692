//! Infrastructure layer for the companion engine.
//!
//! Contains implementations of the ports defined in `companion-core`:
//! SQLite storage, the OpenAI-compatible generator, configuration loading
//! and API-key resolution.

pub mod config;
pub mod llm;
pub mod secret;
pub mod sqlite;
