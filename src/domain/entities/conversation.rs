//! Conversation entity and participant-authority contract.
//!
//! A conversation owns the ordering sequence for its messages
//! (`last_message_id`) and the participant set consulted by the ingest
//! pipeline. Membership management itself (adding/removing participants)
//! belongs to an external collaborator; this server only reads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;

/// A conversation between a fixed set of participants.
///
/// Maps to the `conversations` table:
/// - id: BIGINT PRIMARY KEY
/// - participant_ids: BIGINT[] NOT NULL -- unique set
/// - last_message_id: BIGINT NOT NULL DEFAULT 0 -- sequence high-water mark
/// - created_at: TIMESTAMPTZ NOT NULL DEFAULT NOW()
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,

    /// Unique participant user ids
    pub participant_ids: Vec<i64>,

    /// Highest message id allocated so far (0 for an empty conversation)
    pub last_message_id: i64,

    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_participant(&self, user_id: i64) -> bool {
        self.participant_ids.contains(&user_id)
    }
}

/// Participant-authority contract (consumed external interface).
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Find a conversation by id.
    async fn find_by_id(&self, id: i64) -> Result<Option<Conversation>, AppError>;

    /// Check whether a user is a participant of the conversation.
    /// Returns false for unknown conversations.
    async fn is_participant(&self, conversation_id: i64, user_id: i64)
        -> Result<bool, AppError>;
}
