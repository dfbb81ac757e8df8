//! # Relay Server
//!
//! A horizontally scalable real-time message relay.
//!
//! This is the application entry point that initializes:
//! - Tracing/logging subsystem
//! - Configuration loading
//! - Database connection pool
//! - Redis fanout bus
//! - Job worker pool
//! - HTTP/WebSocket server

use anyhow::Result;
use tracing::info;

use relay_server::config::Settings;
use relay_server::startup::Application;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for structured logging
    relay_server::telemetry::init_tracing();

    info!("Starting Relay Server...");

    // Load configuration from environment and config files
    let settings = Settings::load()?;
    info!(
        host = %settings.server.host,
        port = %settings.server.port,
        environment = %settings.environment,
        "Configuration loaded"
    );

    // Build and run the application
    let application = Application::build(settings).await?;

    info!("Server ready to accept connections");
    application.run_until_stopped().await?;

    Ok(())
}
