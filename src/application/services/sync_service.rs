//! State Sync Guard
//!
//! Reconciles a (re)subscribing client's last-seen position against persisted
//! history. This closes the gap between a client's last acked message and
//! "now", covering disconnect windows and bus drops: the backlog is fetched
//! from the store and delivered directly, bypassing the bus, before live
//! fanout flows for the conversation.

use std::sync::Arc;

use tracing::debug;

use crate::domain::{ConversationRepository, Message, MessageStore};
use crate::shared::error::AppError;

pub struct SyncService {
    store: Arc<dyn MessageStore>,
    conversations: Arc<dyn ConversationRepository>,
}

impl SyncService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        conversations: Arc<dyn ConversationRepository>,
    ) -> Self {
        Self {
            store,
            conversations,
        }
    }

    /// Fetch the messages a user missed in a conversation.
    ///
    /// Keyed by (user, conversation, last-acked id) rather than connection
    /// identity, so a user reconnecting through a different instance never
    /// depends on state owned by the old one. Idempotent: the same position
    /// yields the same sequence as long as only appends happened in between.
    pub async fn reconcile(
        &self,
        conversation_id: i64,
        user_id: i64,
        last_acked_message_id: i64,
    ) -> Result<Vec<Message>, AppError> {
        if !self
            .conversations
            .is_participant(conversation_id, user_id)
            .await?
        {
            return Err(AppError::Unauthorized(format!(
                "User {} is not a participant of conversation {}",
                user_id, conversation_id
            )));
        }

        let backlog = self
            .store
            .fetch_since(conversation_id, last_acked_message_id)
            .await?;

        debug!(
            conversation_id = conversation_id,
            user_id = user_id,
            after = last_acked_message_id,
            count = backlog.len(),
            "Reconciled subscription backlog"
        );

        Ok(backlog)
    }
}
