//! Application settings and configuration structures.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Server configuration (host, port)
    pub server: ServerSettings,

    /// Database configuration (PostgreSQL)
    pub database: DatabaseSettings,

    /// Redis configuration (fanout bus)
    pub redis: RedisSettings,

    /// Gateway token verification settings
    pub auth: AuthSettings,

    /// WebSocket gateway configuration
    pub gateway: GatewaySettings,

    /// Message ingest configuration
    pub ingest: IngestSettings,

    /// Fanout bus configuration
    pub fanout: FanoutSettings,

    /// Background job configuration
    pub jobs: JobSettings,

    /// CORS configuration
    pub cors: CorsSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Server binding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,

    /// Port number to listen on
    pub port: u16,
}

/// PostgreSQL database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Database connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections to maintain
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    pub acquire_timeout: u64,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    /// Redis connection URL
    pub url: String,
}

/// Gateway token verification configuration.
///
/// Tokens are issued by the external identity service; this server only
/// verifies the signature on the shared secret.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSettings {
    /// Shared secret for verifying identity tokens
    pub jwt_secret: String,
}

/// WebSocket gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    /// Heartbeat window in seconds; connections silent for longer are dropped
    pub heartbeat_window_secs: u64,

    /// Outbound frame channel capacity per connection.
    /// A full buffer means a stalled client; further pushes are dropped and
    /// reconciliation recovers them on the next subscribe.
    pub outbound_buffer: usize,

    /// Maximum inbound frame size in bytes
    pub max_frame_bytes: usize,
}

/// Message ingest configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestSettings {
    /// Maximum message body length in characters
    pub max_body_chars: usize,
}

/// Fanout bus configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FanoutSettings {
    /// Pub/sub channel shared by all instances
    pub channel: String,

    /// Resubscribe backoff base in milliseconds
    pub reconnect_base_ms: u64,

    /// Resubscribe backoff cap in milliseconds
    pub reconnect_cap_ms: u64,
}

/// Background job configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSettings {
    /// Number of worker tasks draining the queue
    pub workers: usize,

    /// Attempts before a job is buried as dead
    pub max_attempts: u32,

    /// Retry backoff base in milliseconds
    pub retry_base_ms: u64,

    /// Retry backoff cap in milliseconds
    pub retry_cap_ms: u64,

    /// Lease duration in seconds; an expired lease makes the job pullable again
    pub lease_secs: u64,

    /// Queue poll interval in milliseconds when the queue is empty
    pub poll_interval_ms: u64,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsSettings {
    /// Allowed origins (comma-separated in env)
    pub allowed_origins: Vec<String>,
}

/// Minimum required length for the token verification secret (256 bits)
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if the token secret is too short.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        // Determine the running environment
        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout", 30)?
            .set_default("gateway.heartbeat_window_secs", 30_i64)?
            .set_default("gateway.outbound_buffer", 256_i64)?
            .set_default("gateway.max_frame_bytes", 65536_i64)? // 64KB
            .set_default("ingest.max_body_chars", 4000_i64)?
            .set_default("fanout.channel", "relay:fanout")?
            .set_default("fanout.reconnect_base_ms", 200_i64)?
            .set_default("fanout.reconnect_cap_ms", 5000_i64)?
            .set_default("jobs.workers", 4_i64)?
            .set_default("jobs.max_attempts", 5_i64)?
            .set_default("jobs.retry_base_ms", 1000_i64)?
            .set_default("jobs.retry_cap_ms", 60000_i64)?
            .set_default("jobs.lease_secs", 30_i64)?
            .set_default("jobs.poll_interval_ms", 500_i64)?
            .set_default("cors.allowed_origins", vec!["http://localhost:3000"])?
            // Load from config files
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Load from environment variables
            // APP__SERVER__PORT=3000 -> server.port = 3000
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            // Map simple environment variables
            .set_override_option(
                "server.host",
                std::env::var("SERVER_HOST").ok(),
            )?
            .set_override_option(
                "server.port",
                std::env::var("SERVER_PORT").ok(),
            )?
            .set_override_option(
                "database.url",
                std::env::var("DATABASE_URL").ok(),
            )?
            .set_override_option(
                "redis.url",
                std::env::var("REDIS_URL").ok(),
            )?
            .set_override_option(
                "auth.jwt_secret",
                std::env::var("JWT_SECRET").ok(),
            )?
            .build()?
            .try_deserialize()
            .and_then(|settings: Self| {
                // Enforce a minimum secret length; a short secret makes token
                // forgery practical
                if settings.auth.jwt_secret.len() < MIN_JWT_SECRET_LENGTH {
                    return Err(ConfigError::Message(format!(
                        "JWT secret must be at least {} characters. Current length: {}",
                        MIN_JWT_SECRET_LENGTH,
                        settings.auth.jwt_secret.len()
                    )));
                }
                Ok(settings)
            })
    }

    /// Get the full server address as a string.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl ServerSettings {
    /// Get the socket address for binding.
    pub fn socket_addr(&self) -> std::net::SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .expect("Invalid server address configuration")
    }
}
