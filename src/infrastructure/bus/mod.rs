//! Fanout Bus Module
//!
//! Redis connection management and the pub/sub fanout bus implementation.
//!
//! Every instance publishes message events to one shared channel and holds
//! one long-lived subscription to it. The bus is best-effort: nothing is
//! persisted on it, and a dropped event is recovered by reconciliation
//! against the message store.

mod redis_bus;

pub use redis_bus::{BusStatus, RedisFanoutBus};

use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{info, instrument};

use crate::config::RedisSettings;

/// Creates a Redis connection manager with automatic reconnection.
///
/// Used for the publish side and health checks; the subscribe side holds its
/// own dedicated pub/sub connection (see [`RedisFanoutBus`]).
#[instrument(skip(settings), fields(url = %settings.url))]
pub async fn create_redis_client(
    settings: &RedisSettings,
) -> Result<ConnectionManager, redis::RedisError> {
    info!("Connecting to Redis...");
    let client = Client::open(settings.url.as_str())?;
    let manager = ConnectionManager::new(client).await?;
    info!("Redis connection established");
    Ok(manager)
}
