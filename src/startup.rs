//! Application Startup
//!
//! Application building, background task wiring, and server initialization.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use redis::aio::ConnectionManager;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::application::services::{
    IngestService, JobRouter, SyncService, WorkerConfig, WorkerPool,
};
use crate::config::Settings;
use crate::domain::{
    ConversationRepository, DeliverySink, FanoutBus, JobQueue, MailSender, MessageStore,
};
use crate::infrastructure::bus::{BusStatus, RedisFanoutBus};
use crate::infrastructure::mailer::LogMailer;
use crate::infrastructure::queue::PgJobQueue;
use crate::infrastructure::repositories::{PgConversationRepository, PgMessageStore};
use crate::infrastructure::{bus, database};
use crate::presentation::http::{health, routes};
use crate::presentation::middleware::{cors, logging};
use crate::presentation::websocket::{ConnectionRegistry, DeliveryDispatcher};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub redis: ConnectionManager,
    pub registry: Arc<ConnectionRegistry>,
    pub bus_status: Arc<BusStatus>,
    pub ingest: Arc<IngestService>,
    pub sync: Arc<SyncService>,
    pub jobs: Arc<JobRouter>,
    pub settings: Arc<Settings>,
    pub instance_id: Uuid,
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
    shutdown_tx: watch::Sender<bool>,
    worker_handles: Vec<JoinHandle<()>>,
    fanout_handle: JoinHandle<()>,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        health::init_server_start();

        // Each instance gets a fresh identity; fanout events carry it
        let instance_id = Uuid::new_v4();
        tracing::info!(instance_id = %instance_id, "Starting instance");

        // Create database pool
        let db = database::create_pool(&settings.database).await?;
        database::run_migrations(&db).await?;
        tracing::info!("Database connection pool created");

        // Redis connection for health checks, plus the fanout bus itself
        let redis = bus::create_redis_client(&settings.redis).await?;
        let fanout_bus = RedisFanoutBus::connect(&settings.redis, &settings.fanout).await?;
        let bus_status = fanout_bus.status();

        // Instance-local delivery plumbing
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Arc::new(DeliveryDispatcher::new(registry.clone()));

        // Domain contracts over the infrastructure
        let store: Arc<dyn MessageStore> = Arc::new(PgMessageStore::new(db.clone()));
        let conversations: Arc<dyn ConversationRepository> =
            Arc::new(PgConversationRepository::new(db.clone()));
        let shared_bus: Arc<dyn FanoutBus> = Arc::new(fanout_bus);
        let queue: Arc<dyn JobQueue> = Arc::new(PgJobQueue::new(
            db.clone(),
            Duration::from_secs(settings.jobs.lease_secs),
        ));
        let mail: Arc<dyn MailSender> = Arc::new(LogMailer);

        // Application services
        let ingest = Arc::new(IngestService::new(
            store.clone(),
            conversations.clone(),
            shared_bus.clone(),
            dispatcher.clone() as Arc<dyn DeliverySink>,
            instance_id,
            settings.ingest.max_body_chars,
        ));
        let sync = Arc::new(SyncService::new(store.clone(), conversations.clone()));
        let jobs = Arc::new(JobRouter::new(queue.clone()));

        // Long-lived fanout consumer: one subscription per instance
        let events = shared_bus.subscribe();
        let consumer = dispatcher.clone();
        let fanout_handle = tokio::spawn(async move {
            consumer.run(events).await;
        });

        // Worker pool draining the job queue
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool = Arc::new(WorkerPool::new(
            queue.clone(),
            mail,
            WorkerConfig::from_settings(&settings.jobs),
        ));
        let worker_handles = pool.spawn(shutdown_rx);

        // Create app state
        let state = AppState {
            db,
            redis,
            registry,
            bus_status,
            ingest,
            sync,
            jobs,
            settings: Arc::new(settings.clone()),
            instance_id,
        };

        // Build router with middleware
        let router = routes::create_router(state)
            .layer(logging::create_trace_layer())
            .layer(cors::create_cors_layer(&settings.cors));

        // Bind to address
        let addr = SocketAddr::from(([0, 0, 0, 0], settings.server.port));
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Listening on {}", addr);

        Ok(Self {
            listener,
            router,
            shutdown_tx,
            worker_handles,
            fanout_handle,
        })
    }

    /// Run the server until SIGINT/SIGTERM, then drain background work.
    pub async fn run_until_stopped(self) -> Result<()> {
        let Self {
            listener,
            router,
            shutdown_tx,
            worker_handles,
            fanout_handle,
        } = self;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        // Workers finish their current job; leases are never left dangling
        let _ = shutdown_tx.send(true);
        for handle in worker_handles {
            let _ = handle.await;
        }
        fanout_handle.abort();

        tracing::info!("Shutdown complete");
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
