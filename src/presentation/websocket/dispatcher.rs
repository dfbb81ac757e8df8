//! Delivery Dispatcher
//!
//! Consumes fanout events and pushes them to locally-registered connections
//! subscribed to the event's conversation. Delivery never filters on the
//! event's origin instance: the per-connection high-water mark suppresses the
//! echo the ingesting instance already delivered locally.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::registry::{ConnectionRegistry, Delivery};
use crate::domain::{DeliverySink, FanoutEvent};
use crate::infrastructure::metrics;

pub struct DeliveryDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl DeliveryDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Long-lived consume loop over a bus subscription. The bus owns
    /// transport recovery; this stream only ends on shutdown.
    pub async fn run(&self, mut events: mpsc::Receiver<FanoutEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(&event);
        }
        warn!("Fanout stream closed, dispatcher stopping");
    }

    /// Push one event to every local subscriber of its conversation.
    /// Push failures are swallowed: the registry is the source of truth for
    /// "still connected", and reconciliation recovers dropped frames.
    pub fn dispatch(&self, event: &FanoutEvent) {
        for handle in self.registry.connections_for(event.conversation_id) {
            match handle.deliver(&event.message, true) {
                Delivery::Sent => {
                    metrics::DELIVERIES_TOTAL.inc();
                }
                Delivery::Buffered => {
                    // Held while the subscription reconciles; counted when
                    // the flush on go-live sends it
                }
                Delivery::Duplicate => {
                    metrics::DELIVERY_DUPLICATES_TOTAL.inc();
                }
                Delivery::Skipped => {}
                Delivery::Failed => {
                    debug!(
                        connection_id = %handle.id(),
                        conversation_id = event.conversation_id,
                        message_id = event.message.id,
                        "Push failed, dropping frame for this connection"
                    );
                }
            }
        }
    }
}

impl DeliverySink for DeliveryDispatcher {
    fn dispatch(&self, event: &FanoutEvent) {
        DeliveryDispatcher::dispatch(self, event);
    }
}
