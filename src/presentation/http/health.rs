//! Health Check Handlers
//!
//! Liveness and readiness probes shaped around the relay's dependency model:
//! without the message store nothing can be persisted (hard dependency),
//! while a lost fanout subscription only degrades cross-instance delivery,
//! since same-instance delivery keeps working and reconciliation closes the
//! gap for everyone else.
//!
//! # Endpoints
//! - `GET /health` - Basic health check
//! - `GET /health/live` - Liveness probe (is the server running?)
//! - `GET /health/ready` - Readiness probe (can the server accept traffic?)

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::time::Instant;

use crate::startup::AppState;

/// Server start time for uptime calculation
static SERVER_START: Lazy<Instant> = Lazy::new(Instant::now);
static SERVER_START_TIME: Lazy<DateTime<Utc>> = Lazy::new(Utc::now);

/// Initialize the server start time (call during startup)
pub fn init_server_start() {
    Lazy::force(&SERVER_START);
    Lazy::force(&SERVER_START_TIME);
}

/// Basic health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Detailed health check response
#[derive(Debug, Serialize)]
pub struct DetailedHealthResponse {
    pub status: HealthStatus,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub started_at: String,
    pub checks: HealthChecks,
}

/// Individual service health checks
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub store: StoreHealth,
    pub fanout: FanoutHealth,
    pub gateway: GatewayHealth,
}

/// Message store health (hard dependency)
#[derive(Debug, Serialize)]
pub struct StoreHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Fanout health: the long-lived subscription is the signal that matters,
/// the publish-side round trip is supporting latency detail.
#[derive(Debug, Serialize)]
pub struct FanoutHealth {
    pub status: HealthStatus,
    /// Whether the instance currently holds its bus subscription
    pub subscribed: bool,
    /// Times the subscription was re-established since startup
    pub resubscribes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Gateway registry health
#[derive(Debug, Serialize)]
pub struct GatewayHealth {
    pub status: HealthStatus,
    pub active_connections: usize,
    /// Conversations with at least one local subscriber
    pub active_conversations: usize,
}

/// Overall health status
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Simple liveness response
#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
}

/// Basic health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Liveness probe - checks if the server is running
/// Returns 200 if alive, used by Kubernetes to restart dead pods
pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse { status: "alive" })
}

/// Readiness probe - checks if the server can accept traffic
/// Returns 200 if ready, 503 if the message store is unavailable
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = SERVER_START.elapsed().as_secs();
    let started_at = SERVER_START_TIME.to_rfc3339();

    let store_health = check_store(&state).await;
    let fanout_health = check_fanout(&state).await;

    let gateway_health = GatewayHealth {
        status: HealthStatus::Healthy,
        active_connections: state.registry.len(),
        active_conversations: state.registry.conversation_count(),
    };

    let overall_status = determine_overall_status(&store_health, &fanout_health);

    let response = DetailedHealthResponse {
        status: overall_status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: uptime,
        started_at,
        checks: HealthChecks {
            store: store_health,
            fanout: fanout_health,
            gateway: gateway_health,
        },
    };

    let status_code = match overall_status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(response))
}

/// Round-trip the message store. Ordering and persistence live here, so a
/// failing store makes the instance unready.
async fn check_store(state: &AppState) -> StoreHealth {
    let start = Instant::now();
    match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => {
            let latency = start.elapsed().as_millis() as u64;
            StoreHealth {
                status: if latency < 100 {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Degraded
                },
                latency_ms: Some(latency),
                message: None,
            }
        }
        Err(e) => StoreHealth {
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            message: Some(format!("Store connection failed: {}", e)),
        },
    }
}

/// Fanout readiness: primarily the subscriber loop's own state, plus a
/// publish-side round trip for latency.
async fn check_fanout(state: &AppState) -> FanoutHealth {
    let subscribed = state.bus_status.is_subscribed();
    let resubscribes = state.bus_status.resubscribe_count();

    let start = Instant::now();
    let mut conn = state.redis.clone();
    let publish_latency_ms = redis::cmd("PING")
        .query_async::<String>(&mut conn)
        .await
        .ok()
        .map(|_| start.elapsed().as_millis() as u64);

    let (status, message) = if !subscribed {
        (
            HealthStatus::Degraded,
            Some("fanout subscription down, resubscribe backoff running".to_string()),
        )
    } else if publish_latency_ms.is_none() {
        (
            HealthStatus::Degraded,
            Some("publish transport unreachable".to_string()),
        )
    } else {
        (HealthStatus::Healthy, None)
    };

    FanoutHealth {
        status,
        subscribed,
        resubscribes,
        publish_latency_ms,
        message,
    }
}

/// Overall readiness from the individual checks.
fn determine_overall_status(store: &StoreHealth, fanout: &FanoutHealth) -> HealthStatus {
    // Without the store nothing can be persisted; the instance is down
    if store.status == HealthStatus::Unhealthy {
        return HealthStatus::Unhealthy;
    }

    // Degraded fanout still serves same-instance traffic; remote recipients
    // recover through reconciliation
    if store.status == HealthStatus::Degraded || fanout.status != HealthStatus::Healthy {
        return HealthStatus::Degraded;
    }

    HealthStatus::Healthy
}
