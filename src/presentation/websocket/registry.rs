//! Connection Registry
//!
//! Per-instance table of active gateway connections. State here is owned
//! exclusively by this instance and never replicated; cross-instance presence
//! is not tracked (multi-instance fanout compensates).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::frames::ServerFrame;
use crate::domain::Message;
use crate::infrastructure::metrics;

/// Outcome of a delivery attempt on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Frame handed to the outbound channel
    Sent,
    /// Held in the sync buffer; flushed when the subscription goes live
    Buffered,
    /// At or below the connection's high-water mark for the conversation
    Duplicate,
    /// Not subscribed to the conversation
    Skipped,
    /// Outbound channel full or closed; reconciliation recovers on resubscribe
    Failed,
}

/// Live events held per subscription while reconciliation runs. A window
/// this large outliving a reconcile means the client is better served by a
/// fresh resubscribe anyway.
const SYNC_BUFFER_LIMIT: usize = 1024;

/// Where a subscription is in its lifecycle.
#[derive(Debug)]
enum SubscriptionPhase {
    /// Reconciliation in progress. The bus is at-most-once with no replay,
    /// so live fanout arriving now is buffered, not dropped, and flushed on
    /// the flip to live.
    Syncing { pending: Vec<Message> },
    /// Fanout flows directly
    Live,
}

/// Per-conversation subscription state on one connection.
#[derive(Debug)]
struct Subscription {
    phase: SubscriptionPhase,
    /// Highest message id delivered on this connection for the conversation
    last_delivered: i64,
}

#[derive(Debug)]
struct ConnectionState {
    last_heartbeat: Instant,
    subscriptions: HashMap<i64, Subscription>,
}

struct ConnectionInner {
    id: Uuid,
    user_id: i64,
    sender: mpsc::Sender<ServerFrame>,
    state: Mutex<ConnectionState>,
}

/// Handle to a registered connection. Cheap to clone; the registry and the
/// connection's own task share it.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<ConnectionInner>,
}

impl ConnectionHandle {
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn user_id(&self) -> i64 {
        self.inner.user_id
    }

    /// Record a heartbeat frame.
    pub fn heartbeat(&self) {
        self.inner.state.lock().last_heartbeat = Instant::now();
    }

    /// Whether a heartbeat arrived within the window.
    pub fn is_alive(&self, window: Duration) -> bool {
        self.inner.state.lock().last_heartbeat.elapsed() < window
    }

    /// Conversations this connection is subscribed to.
    pub fn subscribed_conversations(&self) -> Vec<i64> {
        self.inner.state.lock().subscriptions.keys().copied().collect()
    }

    /// Push a message to this connection, enforcing the never-double-deliver
    /// policy via the per-conversation high-water mark.
    ///
    /// `require_live` marks the live fanout path: while the subscription is
    /// still reconciling, those events are buffered and flushed on the flip
    /// to live. Backlog delivery passes `false` and goes straight out. The
    /// mark advances before the channel push: a frame lost to a full buffer
    /// is recovered by reconciliation on the next subscribe, not by a
    /// duplicate.
    pub fn deliver(&self, message: &Message, require_live: bool) -> Delivery {
        let mut state = self.inner.state.lock();

        let Some(subscription) = state.subscriptions.get_mut(&message.conversation_id) else {
            return Delivery::Skipped;
        };
        if message.id <= subscription.last_delivered {
            return Delivery::Duplicate;
        }

        if require_live {
            if let SubscriptionPhase::Syncing { pending } = &mut subscription.phase {
                if pending.iter().any(|m| m.id == message.id) {
                    return Delivery::Duplicate;
                }
                if pending.len() >= SYNC_BUFFER_LIMIT {
                    return Delivery::Failed;
                }
                pending.push(message.clone());
                return Delivery::Buffered;
            }
        }

        subscription.last_delivered = message.id;

        match self.inner.sender.try_send(ServerFrame::message(message)) {
            Ok(()) => Delivery::Sent,
            Err(_) => Delivery::Failed,
        }
    }

    /// Send a non-message frame (ack, error). Best-effort.
    pub fn send_frame(&self, frame: ServerFrame) -> bool {
        self.inner.sender.try_send(frame).is_ok()
    }
}

/// Instance-local registry of active connections.
pub struct ConnectionRegistry {
    /// Active connections by connection id
    connections: DashMap<Uuid, ConnectionHandle>,
    /// Conversation id to subscribed connection ids (for fanout lookup)
    conversation_index: DashMap<i64, Vec<Uuid>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            conversation_index: DashMap::new(),
        }
    }

    /// Register a new connection bound to a verified user identity.
    pub fn register(&self, user_id: i64, sender: mpsc::Sender<ServerFrame>) -> ConnectionHandle {
        let handle = ConnectionHandle {
            inner: Arc::new(ConnectionInner {
                id: Uuid::new_v4(),
                user_id,
                sender,
                state: Mutex::new(ConnectionState {
                    last_heartbeat: Instant::now(),
                    subscriptions: HashMap::new(),
                }),
            }),
        };

        self.connections.insert(handle.id(), handle.clone());
        metrics::CONNECTIONS_ACTIVE.set(self.connections.len() as i64);

        tracing::info!(
            user_id = user_id,
            connection_id = %handle.id(),
            "Connection registered"
        );

        handle
    }

    /// Remove a connection and all of its subscription state.
    pub fn unregister(&self, handle: &ConnectionHandle) {
        if self.connections.remove(&handle.id()).is_none() {
            return;
        }

        for conversation_id in handle.subscribed_conversations() {
            if let Some(mut ids) = self.conversation_index.get_mut(&conversation_id) {
                ids.retain(|id| *id != handle.id());
            }
        }
        metrics::CONNECTIONS_ACTIVE.set(self.connections.len() as i64);

        tracing::info!(
            user_id = handle.user_id(),
            connection_id = %handle.id(),
            "Connection unregistered"
        );
    }

    /// Start (or restart) a subscription at the client-declared position.
    /// The subscription is not live until [`mark_live`]; the dispatcher
    /// skips it while reconciliation delivers the backlog.
    ///
    /// [`mark_live`]: ConnectionRegistry::mark_live
    pub fn begin_subscription(
        &self,
        handle: &ConnectionHandle,
        conversation_id: i64,
        last_acked_message_id: i64,
    ) {
        {
            let mut state = handle.inner.state.lock();
            state.subscriptions.insert(
                conversation_id,
                Subscription {
                    phase: SubscriptionPhase::Syncing {
                        pending: Vec::new(),
                    },
                    last_delivered: last_acked_message_id,
                },
            );
        }

        let mut ids = self.conversation_index.entry(conversation_id).or_default();
        if !ids.contains(&handle.id()) {
            ids.push(handle.id());
        }
    }

    /// Drop a subscription (e.g. after a failed reconcile).
    pub fn remove_subscription(&self, handle: &ConnectionHandle, conversation_id: i64) {
        handle.inner.state.lock().subscriptions.remove(&conversation_id);
        if let Some(mut ids) = self.conversation_index.get_mut(&conversation_id) {
            ids.retain(|id| *id != handle.id());
        }
    }

    /// Flip a reconciled subscription live, flushing events buffered during
    /// the sync window through the high-water mark. The lock is held across
    /// flush and flip, so an event either lands in the buffer or is
    /// delivered live; nothing falls between.
    pub fn mark_live(&self, handle: &ConnectionHandle, conversation_id: i64) {
        let mut state = handle.inner.state.lock();
        let Some(subscription) = state.subscriptions.get_mut(&conversation_id) else {
            return;
        };

        let mut pending =
            match std::mem::replace(&mut subscription.phase, SubscriptionPhase::Live) {
                SubscriptionPhase::Syncing { pending } => pending,
                SubscriptionPhase::Live => return,
            };

        pending.sort_by_key(|m| m.id);
        for message in pending {
            // Anything the backlog already covered stays suppressed
            if message.id <= subscription.last_delivered {
                continue;
            }
            subscription.last_delivered = message.id;
            if handle
                .inner
                .sender
                .try_send(ServerFrame::message(&message))
                .is_ok()
            {
                metrics::DELIVERIES_TOTAL.inc();
            }
        }
    }

    /// Connections currently subscribed to a conversation.
    pub fn connections_for(&self, conversation_id: i64) -> Vec<ConnectionHandle> {
        let Some(ids) = self.conversation_index.get(&conversation_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.connections.get(id).map(|entry| entry.value().clone()))
            .collect()
    }

    /// Active connection count.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Conversations with at least one locally subscribed connection.
    pub fn conversation_count(&self) -> usize {
        self.conversation_index
            .iter()
            .filter(|entry| !entry.is_empty())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
