//! Chat history: the in-memory invariant and its persistence ports.

pub mod repository;
pub mod store;

pub use store::{ChatHistory, HistoryError};
pub use repository::{
    ChatHistoryRepository, CompanionStore, RelationshipRepository, TurnRepository,
    UserProfileRepository,
};
