//! Background job entity and durable-queue contract.
//!
//! Retry state (attempt count, next retry time) lives on the persisted row,
//! not in in-process timers, so a restart resumes retries where they stopped.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::error::AppError;

/// Kinds of side-effect work routed through the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// One-time-password email dispatch
    SendOtp,
    /// General mail dispatch
    SendMail,
}

impl JobKind {
    /// Convert from database string representation.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "send_otp" => Some(Self::SendOtp),
            "send_mail" => Some(Self::SendMail),
            _ => None,
        }
    }

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendOtp => "send_otp",
            Self::SendMail => "send_mail",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Job lifecycle. `Done` and `Dead` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue (or waiting for its next retry time)
    #[default]
    Pending,
    /// Leased by exactly one worker
    InFlight,
    /// Completed successfully
    Done,
    /// Exhausted its retry budget; kept for operator inspection
    Dead,
}

impl JobStatus {
    pub fn from_str(s: &str) -> Self {
        match s {
            "in_flight" => Self::InFlight,
            "done" => Self::Done,
            "dead" => Self::Dead,
            _ => Self::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Done => "done",
            Self::Dead => "dead",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Dead)
    }
}

/// A queued unit of side-effect work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Time-ordered id assigned at enqueue
    pub id: Uuid,

    pub kind: JobKind,

    /// Kind-specific payload (recipient, template data, ...)
    pub payload: serde_json::Value,

    /// Completed execution attempts
    pub attempts: u32,

    /// Earliest time the job may be pulled again
    pub next_retry_at: DateTime<Utc>,

    pub status: JobStatus,

    /// Failure detail from the most recent attempt
    pub last_error: Option<String>,

    /// Token identifying the current lease holder; assigned by `pull`,
    /// cleared when the lease resolves
    #[serde(default)]
    pub lease: Option<Uuid>,

    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Build a new pending job, pullable immediately.
    pub fn new(kind: JobKind, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            kind,
            payload,
            attempts: 0,
            next_retry_at: now,
            status: JobStatus::Pending,
            last_error: None,
            lease: None,
            created_at: now,
        }
    }
}

/// Durable-queue contract (consumed external interface).
///
/// The queue enforces single ownership: `pull` leases a job to exactly one
/// worker at a time under a fresh lease token, and a lease that is neither
/// acked nor nacked before its deadline is reclaimed so no job stays claimed
/// with no owner. Every completion call carries the caller's token; an
/// outcome reported under a reclaimed (stale) lease is ignored, so an old
/// owner can never clobber the new one.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Durably enqueue a job.
    async fn enqueue(&self, job: &Job) -> Result<(), AppError>;

    /// Lease the next due job, if any. The returned job is `InFlight`,
    /// carries the attempt count of *previous* executions, and holds the
    /// lease token the caller must present on completion.
    async fn pull(&self) -> Result<Option<Job>, AppError>;

    /// Complete a leased job. A stale lease is ignored.
    async fn ack(&self, job: &Job) -> Result<(), AppError>;

    /// Fail a leased job: record the error, count the attempt, and make the
    /// job pullable again after `retry_after`. A stale lease is ignored.
    async fn nack(&self, job: &Job, retry_after: Duration, error: &str)
        -> Result<(), AppError>;

    /// Terminally fail a leased job. Dead jobs are never pulled again but
    /// stay queryable for operators. A stale lease is ignored.
    async fn bury(&self, job: &Job, reason: &str) -> Result<(), AppError>;

    /// Operator surface: list dead jobs, newest first.
    async fn dead_jobs(&self, limit: i64) -> Result<Vec<Job>, AppError>;
}

/// Mail/OTP transport contract (consumed external interface).
///
/// The worker pool executes every job through this seam; the real transport
/// lives outside this service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, kind: JobKind, payload: &serde_json::Value) -> Result<(), AppError>;
}
