//! Message Store Implementation
//!
//! PostgreSQL implementation of the persisted-store contract. The
//! conversation row's `last_message_id` is the sequence counter; allocation
//! and insert happen in one transaction, so ids are strictly increasing with
//! no gaps regardless of how many instances write concurrently.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::{DeliveryState, Message, MessageStore};
use crate::shared::error::AppError;

/// PostgreSQL message store.
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    /// Creates a new PgMessageStore with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Internal row type for message queries.
/// Maps to the messages table schema defined in the migration.
#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    conversation_id: i64,
    id: i64,
    sender_id: i64,
    body: String,
    created_at: DateTime<Utc>,
}

impl MessageRow {
    /// Converts database row to domain Message entity.
    fn into_message(self) -> Message {
        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            body: self.body,
            delivery_state: DeliveryState::Persisted,
            created_at: self.created_at,
        }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    /// Allocate the next sequence id and persist the message atomically.
    ///
    /// The `UPDATE ... RETURNING` on the conversation row serializes
    /// concurrent senders per conversation; the transaction guarantees no
    /// allocated id is ever left without its message row.
    async fn allocate_and_persist(
        &self,
        conversation_id: i64,
        sender_id: i64,
        body: &str,
    ) -> Result<Message, AppError> {
        let mut tx = self.pool.begin().await?;

        let next_id: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE conversations
            SET last_message_id = last_message_id + 1
            WHERE id = $1
            RETURNING last_message_id
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&mut *tx)
        .await?;

        let next_id = next_id
            .ok_or_else(|| AppError::NotFound(format!("Conversation {} not found", conversation_id)))?;

        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO messages (conversation_id, id, sender_id, body)
            VALUES ($1, $2, $3, $4)
            RETURNING conversation_id, id, sender_id, body, created_at
            "#,
        )
        .bind(conversation_id)
        .bind(next_id)
        .bind(sender_id)
        .bind(body)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(row.into_message())
    }

    /// Fetch messages with id greater than the cursor, oldest first.
    ///
    /// Keyset pagination on the primary key; the same query backs both
    /// reconciliation and history catch-up.
    async fn fetch_since(
        &self,
        conversation_id: i64,
        after_id: i64,
    ) -> Result<Vec<Message>, AppError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT conversation_id, id, sender_id, body, created_at
            FROM messages
            WHERE conversation_id = $1 AND id > $2
            ORDER BY id ASC
            "#,
        )
        .bind(conversation_id)
        .bind(after_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_message()).collect())
    }
}
