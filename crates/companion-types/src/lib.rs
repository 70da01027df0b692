//! Shared domain types for the companion conversation engine.
//!
//! This crate contains the value objects used across the workspace:
//! relationship scores, chat messages and summaries, character settings,
//! generator request/response shapes, events, and configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod character;
pub mod chat;
pub mod config;
pub mod error;
pub mod event;
pub mod llm;
pub mod relationship;
