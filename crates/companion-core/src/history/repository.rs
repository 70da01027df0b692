//! Persistence ports for chat history, relationships, and the user profile.
//!
//! Follows the RPITIT repository pattern: implementations live in
//! companion-infra (e.g., `SqliteCompanionStore`) and are used through
//! generics, never trait objects.

use companion_types::character::UserProfile;
use companion_types::chat::{ChatMessage, ContextSummary};
use companion_types::error::RepositoryError;
use companion_types::relationship::Relationship;

/// Durable per-character message log plus its rolling summary.
pub trait ChatHistoryRepository: Send + Sync {
    /// Load all messages of a character in insertion order.
    fn load_messages(
        &self,
        character_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<ChatMessage>, RepositoryError>> + Send;

    /// Append messages, preserving their order.
    fn append_messages(
        &self,
        character_id: &str,
        messages: &[ChatMessage],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Replace the whole log of a character (an empty slice clears it).
    ///
    /// Also drops the character's summaries, which would otherwise point at
    /// messages that no longer exist.
    fn save_messages(
        &self,
        character_id: &str,
        messages: &[ChatMessage],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// The most recent summary, if any.
    fn load_summary(
        &self,
        character_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<ContextSummary>, RepositoryError>> + Send;

    /// Store a new summary; it supersedes every earlier one.
    fn insert_summary(
        &self,
        character_id: &str,
        summary: &ContextSummary,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// The last `limit` user/character messages regardless of summarization
    /// state, oldest first. System events are excluded.
    fn recent_raw_messages(
        &self,
        character_id: &str,
        limit: usize,
    ) -> impl std::future::Future<Output = Result<Vec<ChatMessage>, RepositoryError>> + Send;
}

/// Durable relationship per character.
pub trait RelationshipRepository: Send + Sync {
    /// `None` until the first relationship update is saved.
    fn load_relationship(
        &self,
        character_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Relationship>, RepositoryError>> + Send;

    fn save_relationship(
        &self,
        relationship: &Relationship,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}

/// The single user profile shared by all characters.
pub trait UserProfileRepository: Send + Sync {
    fn load_profile(
        &self,
    ) -> impl std::future::Future<Output = Result<UserProfile, RepositoryError>> + Send;

    fn save_profile(
        &self,
        profile: &UserProfile,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}

/// The write that closes a successful turn.
pub trait TurnRepository: Send + Sync {
    /// Append the exchange and save the updated relationship atomically:
    /// either both land or neither does.
    fn persist_turn(
        &self,
        character_id: &str,
        messages: &[ChatMessage],
        relationship: &Relationship,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}

/// Everything the orchestrator persists, as one bound.
pub trait CompanionStore:
    ChatHistoryRepository
    + RelationshipRepository
    + UserProfileRepository
    + TurnRepository
    + 'static
{
}

impl<T> CompanionStore for T where
    T: ChatHistoryRepository
        + RelationshipRepository
        + UserProfileRepository
        + TurnRepository
        + 'static
{
}
