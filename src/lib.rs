//! # Relay Server Library
//!
//! This crate provides a horizontally scalable real-time message relay with:
//! - A WebSocket gateway for real-time communication
//! - PostgreSQL for ordered, durable message persistence
//! - Redis pub/sub for cross-instance message fanout
//! - A durable background-job queue with retrying workers
//!
//! ## Architecture
//!
//! The crate follows Clean Architecture principles:
//!
//! - **Domain Layer**: Core entities and consumed-service contracts
//! - **Application Layer**: Ingest, reconciliation, and job services
//! - **Infrastructure Layer**: Database, bus, queue, and metrics implementations
//! - **Presentation Layer**: WebSocket gateway and operational HTTP endpoints
//!
//! ## Module Structure
//!
//! ```text
//! relay_server/
//! +-- config/        Configuration management
//! +-- domain/        Domain entities and contracts
//! +-- application/   Application services and worker pool
//! +-- infrastructure/ Database, bus, queue, metrics implementations
//! +-- presentation/  WebSocket gateway and HTTP endpoints
//! +-- shared/        Common utilities (errors, backoff)
//! ```

// Configuration module
pub mod config;

// Domain layer - Core business logic
pub mod domain;

// Application layer - Business services
pub mod application;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - Gateway and HTTP handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
