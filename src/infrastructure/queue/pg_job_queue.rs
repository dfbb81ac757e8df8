//! Durable Job Queue Implementation
//!
//! PostgreSQL implementation of the queue contract. Single ownership is
//! enforced with row leases: `pull` claims the next due job under
//! `FOR UPDATE SKIP LOCKED` and stamps a lease deadline plus a fresh lease
//! token; a job whose lease expires without an ack or nack becomes pullable
//! again, so a crashed worker never strands work. Completion paths match on
//! the caller's token, so a stalled worker whose lease was reclaimed cannot
//! requeue, bury, or complete the job out from under the new owner.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{instrument, warn};

use crate::domain::{Job, JobKind, JobQueue, JobStatus};
use crate::shared::error::AppError;

/// PostgreSQL job queue.
pub struct PgJobQueue {
    pool: PgPool,
    /// Lease duration stamped on pull
    lease: Duration,
}

impl PgJobQueue {
    pub fn new(pool: PgPool, lease: Duration) -> Self {
        Self { pool, lease }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: uuid::Uuid,
    kind: String,
    payload: serde_json::Value,
    attempts: i32,
    next_retry_at: DateTime<Utc>,
    status: String,
    last_error: Option<String>,
    lease_token: Option<uuid::Uuid>,
    created_at: DateTime<Utc>,
}

impl JobRow {
    fn into_job(self) -> Result<Job, AppError> {
        let kind = JobKind::from_str(&self.kind)
            .ok_or_else(|| AppError::Internal(format!("Unknown job kind: {}", self.kind)))?;

        Ok(Job {
            id: self.id,
            kind,
            payload: self.payload,
            attempts: self.attempts.max(0) as u32,
            next_retry_at: self.next_retry_at,
            status: JobStatus::from_str(&self.status),
            last_error: self.last_error,
            lease: self.lease_token,
            created_at: self.created_at,
        })
    }
}

/// Enqueue/mutation failures surface as `QueueUnavailable`; the caller owns
/// the fallback decision.
fn queue_err(e: sqlx::Error) -> AppError {
    AppError::QueueUnavailable(e.to_string())
}

#[async_trait]
impl JobQueue for PgJobQueue {
    #[instrument(skip(self, job), fields(job_id = %job.id, kind = %job.kind))]
    async fn enqueue(&self, job: &Job) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, kind, payload, attempts, next_retry_at, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(job.id)
        .bind(job.kind.as_str())
        .bind(&job.payload)
        .bind(job.attempts as i32)
        .bind(job.next_retry_at)
        .bind(job.status.as_str())
        .bind(job.created_at)
        .execute(&self.pool)
        .await
        .map_err(queue_err)?;

        Ok(())
    }

    /// Claim the next due job under a fresh lease token. Eligible: pending
    /// jobs whose retry time has passed, and in-flight jobs whose lease
    /// expired.
    async fn pull(&self) -> Result<Option<Job>, AppError> {
        let token = uuid::Uuid::new_v4();

        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'in_flight',
                leased_until = NOW() + make_interval(secs => $1),
                lease_token = $2
            WHERE id = (
                SELECT id FROM jobs
                WHERE (status = 'pending' AND next_retry_at <= NOW())
                   OR (status = 'in_flight' AND leased_until < NOW())
                ORDER BY next_retry_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, kind, payload, attempts, next_retry_at, status, last_error,
                      lease_token, created_at
            "#,
        )
        .bind(self.lease.as_secs_f64())
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(queue_err)?;

        row.map(|r| r.into_job()).transpose()
    }

    async fn ack(&self, job: &Job) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'done', leased_until = NULL, lease_token = NULL
            WHERE id = $1 AND status = 'in_flight' AND lease_token = $2
            "#,
        )
        .bind(job.id)
        .bind(job.lease)
        .execute(&self.pool)
        .await
        .map_err(queue_err)?;

        if result.rows_affected() == 0 {
            // Lease was reclaimed before the ack arrived; the new owner's
            // outcome stands
            warn!(job_id = %job.id, "Ack under a stale lease, ignored");
        }

        Ok(())
    }

    async fn nack(
        &self,
        job: &Job,
        retry_after: Duration,
        error: &str,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                attempts = attempts + 1,
                next_retry_at = NOW() + make_interval(secs => $2),
                last_error = $3,
                leased_until = NULL,
                lease_token = NULL
            WHERE id = $1 AND status = 'in_flight' AND lease_token = $4
            "#,
        )
        .bind(job.id)
        .bind(retry_after.as_secs_f64())
        .bind(error)
        .bind(job.lease)
        .execute(&self.pool)
        .await
        .map_err(queue_err)?;

        if result.rows_affected() == 0 {
            // A reclaimed job must not be requeued or have its attempt count
            // bumped by its previous owner
            warn!(job_id = %job.id, "Nack under a stale lease, ignored");
        }

        Ok(())
    }

    /// The dead transition happens at most once: only the current lease
    /// holder can bury, and a dead job carries no lease.
    #[instrument(skip(self, job, reason), fields(job_id = %job.id, kind = %job.kind))]
    async fn bury(&self, job: &Job, reason: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'dead',
                attempts = attempts + 1,
                last_error = $2,
                leased_until = NULL,
                lease_token = NULL
            WHERE id = $1 AND status = 'in_flight' AND lease_token = $3
            "#,
        )
        .bind(job.id)
        .bind(reason)
        .bind(job.lease)
        .execute(&self.pool)
        .await
        .map_err(queue_err)?;

        if result.rows_affected() > 0 {
            warn!(job_id = %job.id, kind = %job.kind, reason = reason, "Job buried as dead");
        } else {
            warn!(job_id = %job.id, "Bury under a stale lease, ignored");
        }

        Ok(())
    }

    async fn dead_jobs(&self, limit: i64) -> Result<Vec<Job>, AppError> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, kind, payload, attempts, next_retry_at, status, last_error,
                   lease_token, created_at
            FROM jobs
            WHERE status = 'dead'
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(queue_err)?;

        rows.into_iter().map(|r| r.into_job()).collect()
    }
}
