//! Background Job Router
//!
//! Accepts asynchronous work from request handlers and enqueues it durably.
//! Execution happens in the worker pool; the caller only learns whether the
//! job was accepted.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::domain::{Job, JobKind, JobQueue};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;

pub struct JobRouter {
    queue: Arc<dyn JobQueue>,
}

impl JobRouter {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// Durably enqueue a job.
    ///
    /// Fails with `QueueUnavailable` when the queue cannot accept the job;
    /// the caller decides whether to retry synchronously or drop.
    pub async fn submit_job(
        &self,
        kind: JobKind,
        payload: serde_json::Value,
    ) -> Result<Uuid, AppError> {
        let job = Job::new(kind, payload);
        self.queue.enqueue(&job).await?;

        metrics::JOBS_ENQUEUED_TOTAL.inc();
        debug!(job_id = %job.id, kind = %job.kind, "Job enqueued");

        Ok(job.id)
    }
}
