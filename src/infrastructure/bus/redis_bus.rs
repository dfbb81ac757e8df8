//! Redis Pub/Sub Fanout Bus
//!
//! Publishes fanout events on a shared channel and exposes a subscription
//! stream that survives transport disconnects by resubscribing with jittered
//! exponential backoff.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::config::{FanoutSettings, RedisSettings};
use crate::domain::{FanoutBus, FanoutEvent};
use crate::infrastructure::metrics;
use crate::shared::backoff::{Backoff, BackoffPolicy};
use crate::shared::error::AppError;

/// Buffered events per subscriber before backpressure on the bus reader.
const SUBSCRIBER_BUFFER: usize = 1024;

/// Shared view of the subscriber loop's transport state, surfaced by the
/// readiness probe. While `subscribed` is false the instance still ingests
/// and delivers to its own connections; remote recipients catch up through
/// reconciliation.
#[derive(Debug, Default)]
pub struct BusStatus {
    subscribed: AtomicBool,
    resubscribes: AtomicU64,
}

impl BusStatus {
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Relaxed)
    }

    /// Times the subscription had to be re-established since startup.
    pub fn resubscribe_count(&self) -> u64 {
        self.resubscribes.load(Ordering::Relaxed)
    }

    fn set_subscribed(&self, up: bool) {
        self.subscribed.store(up, Ordering::Relaxed);
    }

    fn record_resubscribe(&self) {
        self.resubscribes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Redis-backed fanout bus.
#[derive(Clone)]
pub struct RedisFanoutBus {
    /// Client handle used to open dedicated pub/sub connections
    client: Client,
    /// Shared connection for publishing
    publish_conn: ConnectionManager,
    /// Channel every instance publishes to and subscribes on
    channel: String,
    /// Resubscribe backoff policy
    reconnect: BackoffPolicy,
    /// Subscription liveness shared with the readiness probe
    status: Arc<BusStatus>,
}

impl RedisFanoutBus {
    /// Connect the publish side and remember the subscription parameters.
    pub async fn connect(
        redis_settings: &RedisSettings,
        fanout: &FanoutSettings,
    ) -> Result<Self, redis::RedisError> {
        let client = Client::open(redis_settings.url.as_str())?;
        let publish_conn = ConnectionManager::new(client.clone()).await?;
        info!(channel = %fanout.channel, "Fanout bus connected");

        Ok(Self {
            client,
            publish_conn,
            channel: fanout.channel.clone(),
            reconnect: BackoffPolicy::new(
                Duration::from_millis(fanout.reconnect_base_ms),
                Duration::from_millis(fanout.reconnect_cap_ms),
            ),
            status: Arc::new(BusStatus::default()),
        })
    }

    /// Handle onto the subscription state for readiness reporting.
    pub fn status(&self) -> Arc<BusStatus> {
        self.status.clone()
    }
}

#[async_trait]
impl FanoutBus for RedisFanoutBus {
    #[instrument(skip(self, event), fields(conversation_id = event.conversation_id, message_id = event.message.id))]
    async fn publish(&self, event: &FanoutEvent) -> Result<(), AppError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| AppError::Internal(format!("Fanout event serialization failed: {}", e)))?;

        let mut conn = self.publish_conn.clone();
        let _: () = conn.publish(&self.channel, payload).await?;

        metrics::FANOUT_PUBLISHED_TOTAL.inc();
        debug!("Fanout event published");
        Ok(())
    }

    fn subscribe(&self) -> mpsc::Receiver<FanoutEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let client = self.client.clone();
        let channel = self.channel.clone();
        let policy = self.reconnect;
        let status = self.status.clone();

        tokio::spawn(async move {
            subscriber_loop(client, channel, policy, tx, status).await;
        });

        rx
    }
}

/// Long-lived subscription loop: connect, drain, and on any transport
/// failure sleep out the backoff and resubscribe. Events missed during the
/// gap are not replayed; reconciliation closes them from persisted history.
async fn subscriber_loop(
    client: Client,
    channel: String,
    policy: BackoffPolicy,
    tx: mpsc::Sender<FanoutEvent>,
    status: Arc<BusStatus>,
) {
    let mut backoff = Backoff::new(policy);

    loop {
        match client.get_async_pubsub().await {
            Ok(mut pubsub) => match pubsub.subscribe(&channel).await {
                Ok(()) => {
                    info!(channel = %channel, "Fanout subscription established");
                    status.set_subscribed(true);
                    backoff.reset();

                    let mut stream = pubsub.on_message();
                    while let Some(msg) = stream.next().await {
                        let payload: String = match msg.get_payload() {
                            Ok(p) => p,
                            Err(e) => {
                                warn!(error = %e, "Undecodable bus payload, skipping");
                                continue;
                            }
                        };

                        match serde_json::from_str::<FanoutEvent>(&payload) {
                            Ok(event) => {
                                metrics::FANOUT_RECEIVED_TOTAL.inc();
                                if tx.send(event).await.is_err() {
                                    debug!("Subscriber dropped, ending bus loop");
                                    return;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "Malformed fanout event, skipping");
                            }
                        }
                    }

                    warn!(channel = %channel, "Fanout subscription ended");
                }
                Err(e) => {
                    warn!(error = %e, "Fanout subscribe failed");
                }
            },
            Err(e) => {
                warn!(error = %e, "Fanout pub/sub connection failed");
            }
        }

        status.set_subscribed(false);

        if tx.is_closed() {
            return;
        }

        let delay = backoff.next_delay();
        status.record_resubscribe();
        warn!(
            attempt = backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            "Resubscribing to fanout bus after backoff"
        );
        tokio::time::sleep(delay).await;
    }
}

impl std::fmt::Debug for RedisFanoutBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisFanoutBus")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}
