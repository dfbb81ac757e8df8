//! Durable Queue Module
//!
//! PostgreSQL-leased implementation of the job queue contract.

mod pg_job_queue;

pub use pg_job_queue::PgJobQueue;
