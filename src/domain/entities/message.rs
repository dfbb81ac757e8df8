//! Message entity and persisted-store contract.
//!
//! Maps to the `messages` table. Ordering authority lives here: message ids
//! are allocated by the store from the owning conversation's sequence, inside
//! the same transaction as the insert.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;

/// Delivery lifecycle of a message within an instance.
///
/// The persisted row is the ordering authority and never changes; this state
/// tracks how far the ingest pipeline carried the message. `Persisted` means
/// the durable write completed, `Published` means the fanout event also went
/// out on the bus. A crash between the two is recovered by reconciliation,
/// never by re-writing the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Durably written, fanout not yet confirmed
    #[default]
    Persisted,
    /// Fanout event published to the bus
    Published,
}

/// A chat message.
///
/// Maps to the `messages` table:
/// - conversation_id: BIGINT NOT NULL REFERENCES conversations(id)
/// - id: BIGINT NOT NULL -- per-conversation sequence, strictly increasing
/// - sender_id: BIGINT NOT NULL
/// - body: TEXT NOT NULL
/// - created_at: TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// - PRIMARY KEY (conversation_id, id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Per-conversation sequence number, assigned by the store
    pub id: i64,

    /// Conversation this message belongs to
    pub conversation_id: i64,

    /// Sending user
    pub sender_id: i64,

    /// Message body
    pub body: String,

    /// How far the pipeline carried this message (in-memory projection)
    #[serde(default)]
    pub delivery_state: DeliveryState,

    /// Timestamp when the message was persisted
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Whether `self` comes after `other` in the same conversation.
    pub fn follows(&self, other: &Message) -> bool {
        self.conversation_id == other.conversation_id && self.id > other.id
    }
}

/// Persisted-store contract (consumed external interface).
///
/// The store owns the per-conversation sequence: `allocate_and_persist` is
/// atomic, so ids within a conversation are strictly increasing with no gaps
/// no matter how many instances write concurrently.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Atomically allocate the next sequence id for the conversation and
    /// persist the message. No partial state on failure.
    async fn allocate_and_persist(
        &self,
        conversation_id: i64,
        sender_id: i64,
        body: &str,
    ) -> Result<Message, AppError>;

    /// Fetch all persisted messages in a conversation with id greater than
    /// `after_id`, in ascending id order.
    async fn fetch_since(
        &self,
        conversation_id: i64,
        after_id: i64,
    ) -> Result<Vec<Message>, AppError>;
}
