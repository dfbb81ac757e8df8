//! Fanout event and pub/sub bus contract.
//!
//! Events are transient: they exist only on the bus and in instance memory.
//! The persisted store remains the single ordering authority; everything the
//! bus carries can be reconstructed from it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::message::Message;
use crate::shared::error::AppError;

/// A message-created event broadcast to every instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutEvent {
    pub conversation_id: i64,

    pub message: Message,

    /// Instance that ingested the message. Carried for diagnostics only;
    /// delivery never filters on it.
    pub origin_instance_id: Uuid,
}

impl FanoutEvent {
    pub fn new(message: Message, origin_instance_id: Uuid) -> Self {
        Self {
            conversation_id: message.conversation_id,
            message,
            origin_instance_id,
        }
    }
}

/// Pub/sub bus contract (consumed external interface).
///
/// Delivery is best-effort, at-most-once per subscriber, no replay. Ordering
/// is guaranteed only per publisher connection. Implementations own their
/// transport recovery: a `subscribe` stream survives bus disconnects by
/// resubscribing with backoff, surfacing only a gap (which reconciliation
/// closes), never an error.
#[async_trait]
pub trait FanoutBus: Send + Sync {
    /// Publish an event to all currently subscribed instances.
    async fn publish(&self, event: &FanoutEvent) -> Result<(), AppError>;

    /// Open an infinite event stream. Each call is an independent subscriber.
    fn subscribe(&self) -> mpsc::Receiver<FanoutEvent>;
}

/// Instance-local event sink.
///
/// The ingest pipeline hands every persisted message to the local sink before
/// publishing on the bus, so same-instance recipients keep receiving while
/// the bus reconnects. The sink's per-connection de-duplication makes the
/// later bus echo harmless.
pub trait DeliverySink: Send + Sync {
    fn dispatch(&self, event: &FanoutEvent);
}
