//! Conversation Repository Implementation
//!
//! PostgreSQL implementation of the participant-authority contract.
//! Read-only: membership management belongs to an external collaborator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{Conversation, ConversationRepository};
use crate::shared::error::AppError;

/// PostgreSQL conversation repository.
pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    /// Creates a new PgConversationRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ConversationRow {
    id: i64,
    participant_ids: Vec<i64>,
    last_message_id: i64,
    created_at: DateTime<Utc>,
}

impl ConversationRow {
    fn into_conversation(self) -> Conversation {
        Conversation {
            id: self.id,
            participant_ids: self.participant_ids,
            last_message_id: self.last_message_id,
            created_at: self.created_at,
        }
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<Conversation>, AppError> {
        let row = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT id, participant_ids, last_message_id, created_at
            FROM conversations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_conversation()))
    }

    /// Unknown conversations report false; the ingest pipeline turns that
    /// into `Unauthorized` without leaking existence.
    async fn is_participant(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM conversations
                WHERE id = $1 AND $2 = ANY(participant_ids)
            )
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }
}
