//! Job Worker Pool
//!
//! A fixed pool of tasks draining the durable queue. Each worker pulls a
//! leased job, executes the side effect through the mail transport, and on
//! failure either schedules a retry (exponential backoff with jitter, state
//! persisted on the job row) or buries the job once its attempt budget is
//! spent.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::JobSettings;
use crate::domain::{Job, JobQueue, MailSender};
use crate::infrastructure::metrics;
use crate::shared::backoff::BackoffPolicy;
use crate::shared::error::AppError;

/// Worker pool tuning, distilled from [`JobSettings`].
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub workers: usize,
    pub max_attempts: u32,
    pub retry: BackoffPolicy,
    pub poll_interval: Duration,
}

impl WorkerConfig {
    pub fn from_settings(settings: &JobSettings) -> Self {
        Self {
            workers: settings.workers.max(1),
            max_attempts: settings.max_attempts.max(1),
            retry: BackoffPolicy::new(
                Duration::from_millis(settings.retry_base_ms),
                Duration::from_millis(settings.retry_cap_ms),
            ),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
        }
    }
}

pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    mailer: Arc<dyn MailSender>,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        mailer: Arc<dyn MailSender>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            mailer,
            config,
        }
    }

    /// Spawn the configured number of worker tasks. Workers stop pulling when
    /// the shutdown signal flips; a job mid-execution is finished, not
    /// cancelled, so its lease is always resolved by ack, nack, or bury.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..self.config.workers)
            .map(|worker| {
                let pool = Arc::clone(&self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    pool.worker_loop(worker, shutdown).await;
                })
            })
            .collect()
    }

    async fn worker_loop(&self, worker: usize, mut shutdown: watch::Receiver<bool>) {
        info!(worker = worker, "Job worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_one().await {
                Ok(true) => {
                    // Queue had work; keep draining without a pause
                }
                Ok(false) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    warn!(worker = worker, error = %e, "Queue pull failed");
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        info!(worker = worker, "Job worker stopped");
    }

    /// Pull and execute at most one job. Returns whether a job was processed.
    pub async fn run_one(&self) -> Result<bool, AppError> {
        let Some(job) = self.queue.pull().await? else {
            return Ok(false);
        };
        self.execute(job).await;
        Ok(true)
    }

    async fn execute(&self, job: Job) {
        match self.mailer.send(job.kind, &job.payload).await {
            Ok(()) => {
                if let Err(e) = self.queue.ack(&job).await {
                    warn!(job_id = %job.id, error = %e, "Ack failed after successful execution");
                    return;
                }
                metrics::record_job_outcome("completed");
                debug!(job_id = %job.id, kind = %job.kind, "Job completed");
            }
            Err(e) => self.handle_failure(job, e).await,
        }
    }

    async fn handle_failure(&self, job: Job, cause: AppError) {
        let failed_attempt = job.attempts + 1;

        if failed_attempt >= self.config.max_attempts {
            match self.queue.bury(&job, &cause.to_string()).await {
                Ok(()) => {
                    metrics::record_job_outcome("dead");
                    error!(
                        job_id = %job.id,
                        kind = %job.kind,
                        attempts = failed_attempt,
                        error = %cause,
                        "Job exhausted its retry budget and was buried"
                    );
                }
                Err(e) => {
                    // Lease expiry will hand the job to another worker
                    error!(job_id = %job.id, error = %e, "Bury failed");
                }
            }
            return;
        }

        let delay = self.config.retry.delay_for_attempt(failed_attempt);
        match self.queue.nack(&job, delay, &cause.to_string()).await {
            Ok(()) => {
                metrics::record_job_outcome("retried");
                warn!(
                    job_id = %job.id,
                    kind = %job.kind,
                    attempt = failed_attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %cause,
                    "Job failed, retry scheduled"
                );
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Nack failed");
            }
        }
    }
}
