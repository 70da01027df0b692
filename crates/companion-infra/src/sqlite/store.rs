//! SQLite implementation of the chat history, relationship and profile
//! repositories.
//!
//! Raw queries with private Row structs, reads on the reader pool and writes
//! on the single-connection writer pool. Message order is the insertion
//! order, kept by the autoincrement `seq` column.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use companion_core::history::{
    ChatHistoryRepository, RelationshipRepository, TurnRepository, UserProfileRepository,
};
use companion_types::character::UserProfile;
use companion_types::chat::{ChatMessage, ContextSummary, MessageBody, MessageKind};
use companion_types::error::RepositoryError;
use companion_types::relationship::{Affection, Attitude, Relationship};

use super::pool::DatabasePool;

/// SQLite-backed store for everything the orchestrator persists.
#[derive(Clone)]
pub struct SqliteCompanionStore {
    pool: DatabasePool,
}

impl SqliteCompanionStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Character ids that have any stored history, for status listings.
    pub async fn characters_with_history(&self) -> Result<Vec<String>, RepositoryError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT character_id FROM chat_messages ORDER BY character_id",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct ChatMessageRow {
    id: String,
    character_id: String,
    kind: String,
    content: String,
    emoticon: Option<String>,
    affection_delta: Option<i64>,
    created_at: String,
}

impl ChatMessageRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            character_id: row.try_get("character_id")?,
            kind: row.try_get("kind")?,
            content: row.try_get("content")?,
            emoticon: row.try_get("emoticon")?,
            affection_delta: row.try_get("affection_delta")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_message(self) -> Result<ChatMessage, RepositoryError> {
        let kind: MessageKind = self.kind.parse().map_err(RepositoryError::Query)?;
        let body = match kind {
            MessageKind::User => MessageBody::User,
            MessageKind::System => MessageBody::System,
            MessageKind::Character => MessageBody::Character {
                emoticon: self.emoticon.unwrap_or_default(),
                affection_delta: self.affection_delta.unwrap_or(0) as i32,
            },
            MessageKind::Summary => {
                return Err(RepositoryError::Query(
                    "summary stored as a chat message".to_string(),
                ));
            }
        };

        Ok(ChatMessage {
            id: parse_uuid(&self.id, "message id")?,
            character_id: self.character_id,
            body,
            content: self.content,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

struct ContextSummaryRow {
    id: String,
    character_id: String,
    content: String,
    covers_until: Option<String>,
    message_count: i64,
    created_at: String,
}

impl ContextSummaryRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            character_id: row.try_get("character_id")?,
            content: row.try_get("content")?,
            covers_until: row.try_get("covers_until")?,
            message_count: row.try_get("message_count")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_summary(self) -> Result<ContextSummary, RepositoryError> {
        let covers_until = self
            .covers_until
            .as_deref()
            .map(|id| parse_uuid(id, "covers_until"))
            .transpose()?;

        Ok(ContextSummary {
            id: parse_uuid(&self.id, "summary id")?,
            character_id: self.character_id,
            content: self.content,
            covers_until,
            message_count: self.message_count as u32,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

struct RelationshipRow {
    character_id: String,
    affection: i64,
    attitude: String,
    updated_at: String,
}

impl RelationshipRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            character_id: row.try_get("character_id")?,
            affection: row.try_get("affection")?,
            attitude: row.try_get("attitude")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_relationship(self) -> Result<Relationship, RepositoryError> {
        Ok(Relationship {
            character_id: self.character_id,
            affection: Affection::new(self.affection),
            attitude: Attitude::new(self.attitude),
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct UserProfileRow {
    display_name: Option<String>,
    nickname: Option<String>,
    facts: String,
    updated_at: Option<String>,
}

impl UserProfileRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            display_name: row.try_get("display_name")?,
            nickname: row.try_get("nickname")?,
            facts: row.try_get("facts")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_profile(self) -> Result<UserProfile, RepositoryError> {
        let facts: Vec<String> = serde_json::from_str(&self.facts)
            .map_err(|e| RepositoryError::Query(format!("invalid profile facts: {e}")))?;
        Ok(UserProfile {
            display_name: self.display_name,
            nickname: self.nickname,
            facts,
            updated_at: self.updated_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

fn parse_uuid(s: &str, what: &str) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(s).map_err(|e| RepositoryError::Query(format!("invalid {what}: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Split a message into its `(emoticon, affection_delta)` columns.
fn character_columns(message: &ChatMessage) -> Result<(Option<&str>, Option<i64>), RepositoryError> {
    match &message.body {
        MessageBody::Character {
            emoticon,
            affection_delta,
        } => Ok((Some(emoticon.as_str()), Some(*affection_delta as i64))),
        MessageBody::User | MessageBody::System => Ok((None, None)),
        MessageBody::Summary { .. } => Err(RepositoryError::Query(
            "summary markers are stored as summaries, not messages".to_string(),
        )),
    }
}

async fn insert_message(
    conn: &mut sqlx::SqliteConnection,
    character_id: &str,
    message: &ChatMessage,
) -> Result<(), RepositoryError> {
    let (emoticon, affection_delta) = character_columns(message)?;
    sqlx::query(
        r#"INSERT INTO chat_messages (id, character_id, kind, content, emoticon, affection_delta, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(message.id.to_string())
    .bind(character_id)
    .bind(message.kind().to_string())
    .bind(&message.content)
    .bind(emoticon)
    .bind(affection_delta)
    .bind(format_datetime(&message.created_at))
    .execute(&mut *conn)
    .await
    .map_err(query_err)?;
    Ok(())
}

async fn upsert_relationship(
    conn: &mut sqlx::SqliteConnection,
    relationship: &Relationship,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"INSERT INTO relationships (character_id, affection, attitude, updated_at)
           VALUES (?, ?, ?, ?)
           ON CONFLICT(character_id) DO UPDATE SET
               affection = excluded.affection,
               attitude = excluded.attitude,
               updated_at = excluded.updated_at"#,
    )
    .bind(&relationship.character_id)
    .bind(relationship.affection.value() as i64)
    .bind(relationship.attitude.as_str())
    .bind(format_datetime(&relationship.updated_at))
    .execute(&mut *conn)
    .await
    .map_err(query_err)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Repository implementations
// ---------------------------------------------------------------------------

impl ChatHistoryRepository for SqliteCompanionStore {
    async fn load_messages(&self, character_id: &str) -> Result<Vec<ChatMessage>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM chat_messages WHERE character_id = ? ORDER BY seq")
            .bind(character_id)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        rows.iter()
            .map(|row| {
                ChatMessageRow::from_row(row)
                    .map_err(query_err)?
                    .into_message()
            })
            .collect()
    }

    async fn append_messages(
        &self,
        character_id: &str,
        messages: &[ChatMessage],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        for message in messages {
            insert_message(&mut tx, character_id, message).await?;
        }
        tx.commit().await.map_err(query_err)
    }

    async fn save_messages(
        &self,
        character_id: &str,
        messages: &[ChatMessage],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        sqlx::query("DELETE FROM chat_messages WHERE character_id = ?")
            .bind(character_id)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
        sqlx::query("DELETE FROM context_summaries WHERE character_id = ?")
            .bind(character_id)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
        for message in messages {
            insert_message(&mut tx, character_id, message).await?;
        }
        tx.commit().await.map_err(query_err)
    }

    async fn load_summary(
        &self,
        character_id: &str,
    ) -> Result<Option<ContextSummary>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM context_summaries WHERE character_id = ? ORDER BY seq DESC LIMIT 1",
        )
        .bind(character_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        row.map(|row| {
            ContextSummaryRow::from_row(&row)
                .map_err(query_err)?
                .into_summary()
        })
        .transpose()
    }

    async fn insert_summary(
        &self,
        character_id: &str,
        summary: &ContextSummary,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO context_summaries (id, character_id, content, covers_until, message_count, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(summary.id.to_string())
        .bind(character_id)
        .bind(&summary.content)
        .bind(summary.covers_until.map(|id| id.to_string()))
        .bind(summary.message_count as i64)
        .bind(format_datetime(&summary.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn recent_raw_messages(
        &self,
        character_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM chat_messages
               WHERE character_id = ? AND kind IN ('user', 'character')
               ORDER BY seq DESC LIMIT ?"#,
        )
        .bind(character_id)
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let mut messages = rows
            .iter()
            .map(|row| {
                ChatMessageRow::from_row(row)
                    .map_err(query_err)?
                    .into_message()
            })
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}

impl RelationshipRepository for SqliteCompanionStore {
    async fn load_relationship(
        &self,
        character_id: &str,
    ) -> Result<Option<Relationship>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM relationships WHERE character_id = ?")
            .bind(character_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        row.map(|row| {
            RelationshipRow::from_row(&row)
                .map_err(query_err)?
                .into_relationship()
        })
        .transpose()
    }

    async fn save_relationship(&self, relationship: &Relationship) -> Result<(), RepositoryError> {
        let mut conn = self.pool.writer.acquire().await.map_err(query_err)?;
        upsert_relationship(&mut conn, relationship).await
    }
}

impl TurnRepository for SqliteCompanionStore {
    async fn persist_turn(
        &self,
        character_id: &str,
        messages: &[ChatMessage],
        relationship: &Relationship,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        for message in messages {
            insert_message(&mut tx, character_id, message).await?;
        }
        upsert_relationship(&mut tx, relationship).await?;
        tx.commit().await.map_err(query_err)
    }
}

impl UserProfileRepository for SqliteCompanionStore {
    async fn load_profile(&self) -> Result<UserProfile, RepositoryError> {
        let row = sqlx::query("SELECT * FROM user_profile WHERE id = 1")
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => UserProfileRow::from_row(&row)
                .map_err(query_err)?
                .into_profile(),
            None => Ok(UserProfile::default()),
        }
    }

    async fn save_profile(&self, profile: &UserProfile) -> Result<(), RepositoryError> {
        let facts = serde_json::to_string(&profile.facts)
            .map_err(|e| RepositoryError::Query(format!("cannot encode facts: {e}")))?;
        sqlx::query(
            r#"INSERT INTO user_profile (id, display_name, nickname, facts, updated_at)
               VALUES (1, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   display_name = excluded.display_name,
                   nickname = excluded.nickname,
                   facts = excluded.facts,
                   updated_at = excluded.updated_at"#,
        )
        .bind(&profile.display_name)
        .bind(&profile.nickname)
        .bind(facts)
        .bind(profile.updated_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }
}
