//! Background job routing and retry scenarios.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use relay_server::application::services::{JobRouter, WorkerConfig, WorkerPool};
use relay_server::domain::{JobKind, JobQueue, JobStatus};
use relay_server::shared::backoff::BackoffPolicy;
use relay_server::shared::error::AppError;

use crate::common::{FailingMailer, InMemoryJobQueue, RecordingMailer};

fn worker_config(max_attempts: u32) -> WorkerConfig {
    WorkerConfig {
        workers: 1,
        max_attempts,
        // Zero delays keep retried jobs immediately pullable under test
        retry: BackoffPolicy {
            base: Duration::ZERO,
            cap: Duration::ZERO,
            jitter: 0.0,
        },
        poll_interval: Duration::from_millis(1),
    }
}

#[tokio::test]
async fn enqueued_job_is_executed_and_completed() {
    let queue = Arc::new(InMemoryJobQueue::default());
    let router = JobRouter::new(queue.clone());
    let mailer = Arc::new(RecordingMailer::default());

    let job_id = router
        .submit_job(
            JobKind::SendMail,
            serde_json::json!({"to": "b@example.com", "subject": "hello"}),
        )
        .await
        .unwrap();

    let pool = WorkerPool::new(queue.clone(), mailer.clone(), worker_config(5));
    assert!(pool.run_one().await.unwrap());

    assert_eq!(queue.job(job_id).unwrap().status, JobStatus::Done);
    let sent = mailer.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, JobKind::SendMail);
}

#[tokio::test]
async fn otp_job_failing_every_attempt_dies_exactly_once() {
    let queue = Arc::new(InMemoryJobQueue::default());
    let router = JobRouter::new(queue.clone());
    let mailer = Arc::new(FailingMailer::default());

    let job_id = router
        .submit_job(JobKind::SendOtp, serde_json::json!({"to": "a@example.com"}))
        .await
        .unwrap();

    let pool = WorkerPool::new(queue.clone(), mailer.clone(), worker_config(5));

    // Five consecutive failures exhaust the attempt budget
    for _ in 0..5 {
        assert!(pool.run_one().await.unwrap());
    }

    let job = queue.job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Dead);
    assert_eq!(job.attempts, 5);
    assert_eq!(*mailer.attempts.lock(), 5);

    // Never re-enqueued afterwards, but surfaced to operators
    assert!(!pool.run_one().await.unwrap());
    let dead = queue.dead_jobs(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, job_id);
}

#[tokio::test]
async fn retry_delays_follow_the_backoff_policy() {
    // The policy the worker pool applies between attempts: 1s, 2s, 4s, 8s,
    // 16s nominal for the configured base/cap
    let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(60));
    let nominal: Vec<u64> = (1..=5).map(|a| policy.nominal_delay(a).as_secs()).collect();
    assert_eq!(nominal, vec![1, 2, 4, 8, 16]);
}

#[tokio::test]
async fn stale_owner_cannot_clobber_a_reclaimed_job() {
    let queue = Arc::new(InMemoryJobQueue::default());
    let router = JobRouter::new(queue.clone());

    let job_id = router
        .submit_job(JobKind::SendOtp, serde_json::Value::Null)
        .await
        .unwrap();

    // Worker A leases the job, then stalls past its lease deadline
    let stale = queue.pull().await.unwrap().unwrap();
    queue.expire_lease(job_id);

    // Worker B reclaims the job under a fresh lease
    let fresh = queue.pull().await.unwrap().unwrap();
    assert_ne!(stale.lease, fresh.lease);

    // A wakes up and reports failure; both outcomes are ignored because its
    // lease is stale
    queue
        .nack(&stale, Duration::ZERO, "stale failure")
        .await
        .unwrap();
    assert_eq!(queue.job(job_id).unwrap().status, JobStatus::InFlight);
    queue.bury(&stale, "stale failure").await.unwrap();
    assert_eq!(queue.job(job_id).unwrap().status, JobStatus::InFlight);

    // B's success stands, and A's stale nack did not inflate the attempts
    queue.ack(&fresh).await.unwrap();
    let job = queue.job(job_id).unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.attempts, 0);
}

#[tokio::test]
async fn queue_outage_surfaces_to_the_caller() {
    let queue = Arc::new(InMemoryJobQueue {
        fail_enqueue: true,
        ..Default::default()
    });
    let router = JobRouter::new(queue);

    let err = router
        .submit_job(JobKind::SendOtp, serde_json::Value::Null)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::QueueUnavailable(_)));
}

#[tokio::test]
async fn mixed_outcomes_settle_with_no_stuck_jobs() {
    let queue = Arc::new(InMemoryJobQueue::default());
    let router = JobRouter::new(queue.clone());

    for _ in 0..3 {
        router
            .submit_job(JobKind::SendMail, serde_json::Value::Null)
            .await
            .unwrap();
    }

    let pool = WorkerPool::new(
        queue.clone(),
        Arc::new(RecordingMailer::default()),
        worker_config(5),
    );
    while pool.run_one().await.unwrap() {}

    // Every job reached a resolved state; none are leased with no owner
    assert!(queue
        .statuses()
        .iter()
        .all(|s| *s == JobStatus::Done));
}
