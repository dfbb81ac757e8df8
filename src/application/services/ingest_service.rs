//! Message Ingest Pipeline
//!
//! Validates, orders, and persists an inbound message, then fans it out.
//! Persistence and publish are sequenced, not transactional: a crash between
//! the two leaves a persisted message whose fanout the State Sync Guard
//! reconstructs from history, so delivery is at-least-once and never lost.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{
    ConversationRepository, DeliverySink, DeliveryState, FanoutBus, FanoutEvent, Message,
    MessageStore,
};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;

pub struct IngestService {
    store: Arc<dyn MessageStore>,
    conversations: Arc<dyn ConversationRepository>,
    bus: Arc<dyn FanoutBus>,
    local: Arc<dyn DeliverySink>,
    instance_id: Uuid,
    max_body_chars: usize,
}

impl IngestService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        conversations: Arc<dyn ConversationRepository>,
        bus: Arc<dyn FanoutBus>,
        local: Arc<dyn DeliverySink>,
        instance_id: Uuid,
        max_body_chars: usize,
    ) -> Self {
        Self {
            store,
            conversations,
            bus,
            local,
            instance_id,
            max_body_chars,
        }
    }

    /// Accept a message from a sender.
    ///
    /// Order of operations: participant gate, shape checks, atomic
    /// allocate-and-persist, local dispatch, bus publish. An error anywhere
    /// before the store call leaves no state at all; a store error leaves no
    /// partial state (the caller may retry the whole submit); a bus error
    /// after persistence is degraded fanout, not failure.
    pub async fn submit(
        &self,
        conversation_id: i64,
        sender_id: i64,
        body: &str,
    ) -> Result<Message, AppError> {
        let started = Instant::now();

        if !self
            .conversations
            .is_participant(conversation_id, sender_id)
            .await?
        {
            return Err(AppError::Unauthorized(format!(
                "User {} is not a participant of conversation {}",
                sender_id, conversation_id
            )));
        }

        if body.is_empty() {
            return Err(AppError::InvalidMessage("body must not be empty".into()));
        }
        let chars = body.chars().count();
        if chars > self.max_body_chars {
            return Err(AppError::InvalidMessage(format!(
                "body exceeds {} characters (got {})",
                self.max_body_chars, chars
            )));
        }

        let mut message = self
            .store
            .allocate_and_persist(conversation_id, sender_id, body)
            .await?;

        metrics::MESSAGES_INGESTED_TOTAL.inc();
        debug!(
            conversation_id = conversation_id,
            message_id = message.id,
            sender_id = sender_id,
            "Message persisted"
        );

        // Local recipients first: same-instance delivery must not depend on
        // the bus being up. The bus echo is de-duplicated per connection.
        let event = FanoutEvent::new(message.clone(), self.instance_id);
        self.local.dispatch(&event);

        match self.bus.publish(&event).await {
            Ok(()) => {
                message.delivery_state = DeliveryState::Published;
            }
            Err(e) => {
                warn!(
                    conversation_id = conversation_id,
                    message_id = message.id,
                    error = %e,
                    "Fanout publish failed; remote instances recover via reconciliation"
                );
            }
        }

        metrics::INGEST_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());
        Ok(message)
    }
}
