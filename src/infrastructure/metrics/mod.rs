//! Prometheus Metrics Module
//!
//! Provides application-wide metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - Active gateway connection gauge
//! - Message ingest counter and latency histogram
//! - Fanout publish/receive counters
//! - Delivery and suppressed-duplicate counters
//! - Job outcome counters (completed, retried, dead)

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Active gateway connections
pub static CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new("connections_active", "Number of active gateway connections")
            .namespace("relay_server"),
    )
    .expect("Failed to create CONNECTIONS_ACTIVE metric")
});

/// Messages accepted by the ingest pipeline
pub static MESSAGES_INGESTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("messages_ingested_total", "Messages persisted by the ingest pipeline")
            .namespace("relay_server"),
    )
    .expect("Failed to create MESSAGES_INGESTED_TOTAL metric")
});

/// Ingest latency histogram (validation + persistence + publish)
pub static INGEST_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    let buckets = vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5];
    Histogram::with_opts(
        HistogramOpts::new("ingest_duration_seconds", "Message ingest latency in seconds")
            .namespace("relay_server")
            .buckets(buckets),
    )
    .expect("Failed to create INGEST_DURATION_SECONDS metric")
});

/// Fanout events published to the bus
pub static FANOUT_PUBLISHED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("fanout_published_total", "Fanout events published to the bus")
            .namespace("relay_server"),
    )
    .expect("Failed to create FANOUT_PUBLISHED_TOTAL metric")
});

/// Fanout events received from the bus
pub static FANOUT_RECEIVED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("fanout_received_total", "Fanout events received from the bus")
            .namespace("relay_server"),
    )
    .expect("Failed to create FANOUT_RECEIVED_TOTAL metric")
});

/// Frames pushed to local connections
pub static DELIVERIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("deliveries_total", "Message frames delivered to local connections")
            .namespace("relay_server"),
    )
    .expect("Failed to create DELIVERIES_TOTAL metric")
});

/// Duplicate deliveries suppressed by the per-connection high-water mark
pub static DELIVERY_DUPLICATES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "delivery_duplicates_total",
            "Duplicate deliveries suppressed per connection",
        )
        .namespace("relay_server"),
    )
    .expect("Failed to create DELIVERY_DUPLICATES_TOTAL metric")
});

/// Job outcomes by result: "completed", "retried", "dead"
pub static JOBS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("jobs_total", "Background job outcomes").namespace("relay_server"),
        &["outcome"],
    )
    .expect("Failed to create JOBS_TOTAL metric")
});

/// Jobs accepted by the router
pub static JOBS_ENQUEUED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("jobs_enqueued_total", "Jobs accepted into the durable queue")
            .namespace("relay_server"),
    )
    .expect("Failed to create JOBS_ENQUEUED_TOTAL metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(CONNECTIONS_ACTIVE.clone()))
        .expect("Failed to register CONNECTIONS_ACTIVE");
    registry
        .register(Box::new(MESSAGES_INGESTED_TOTAL.clone()))
        .expect("Failed to register MESSAGES_INGESTED_TOTAL");
    registry
        .register(Box::new(INGEST_DURATION_SECONDS.clone()))
        .expect("Failed to register INGEST_DURATION_SECONDS");
    registry
        .register(Box::new(FANOUT_PUBLISHED_TOTAL.clone()))
        .expect("Failed to register FANOUT_PUBLISHED_TOTAL");
    registry
        .register(Box::new(FANOUT_RECEIVED_TOTAL.clone()))
        .expect("Failed to register FANOUT_RECEIVED_TOTAL");
    registry
        .register(Box::new(DELIVERIES_TOTAL.clone()))
        .expect("Failed to register DELIVERIES_TOTAL");
    registry
        .register(Box::new(DELIVERY_DUPLICATES_TOTAL.clone()))
        .expect("Failed to register DELIVERY_DUPLICATES_TOTAL");
    registry
        .register(Box::new(JOBS_TOTAL.clone()))
        .expect("Failed to register JOBS_TOTAL");
    registry
        .register(Box::new(JOBS_ENQUEUED_TOTAL.clone()))
        .expect("Failed to register JOBS_ENQUEUED_TOTAL");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Metrics should be valid UTF-8")
}

/// Helper to record a job outcome
pub fn record_job_outcome(outcome: &str) {
    JOBS_TOTAL.with_label_values(&[outcome]).inc();
}
