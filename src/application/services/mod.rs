//! Application Services
//!
//! Business logic services that coordinate domain operations.
//!
//! ## Available Services
//!
//! - **IngestService**: message validation, ordering, persistence, fanout
//! - **SyncService**: reconciliation of reconnecting clients against history
//! - **JobRouter**: durable enqueue of background side-effect work
//! - **WorkerPool**: queue drain, retry/backoff, dead-job transitions

pub mod ingest_service;
pub mod job_service;
pub mod sync_service;
pub mod worker_pool;

pub use ingest_service::IngestService;
pub use job_service::JobRouter;
pub use sync_service::SyncService;
pub use worker_pool::{WorkerConfig, WorkerPool};
