//! Common Test Utilities
//!
//! In-memory implementations of the consumed-service contracts plus a test
//! instance builder that wires them the way `startup` does, minus sockets.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use relay_server::application::services::{IngestService, SyncService};
use relay_server::domain::{
    Conversation, ConversationRepository, DeliveryState, FanoutBus, FanoutEvent, Job, JobKind,
    JobQueue, JobStatus, MailSender, Message, MessageStore,
};
use relay_server::presentation::websocket::{
    ConnectionHandle, ConnectionRegistry, DeliveryDispatcher, ServerFrame,
};
use relay_server::shared::error::AppError;

/// In-memory message store with per-conversation sequence allocation.
#[derive(Default)]
pub struct InMemoryMessageStore {
    messages: Mutex<Vec<Message>>,
}

impl InMemoryMessageStore {
    pub fn message_ids(&self, conversation_id: i64) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .messages
            .lock()
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .map(|m| m.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn allocate_and_persist(
        &self,
        conversation_id: i64,
        sender_id: i64,
        body: &str,
    ) -> Result<Message, AppError> {
        let mut messages = self.messages.lock();
        let id = messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .map(|m| m.id)
            .max()
            .unwrap_or(0)
            + 1;
        let message = Message {
            id,
            conversation_id,
            sender_id,
            body: body.to_string(),
            delivery_state: DeliveryState::Persisted,
            created_at: Utc::now(),
        };
        messages.push(message.clone());
        Ok(message)
    }

    async fn fetch_since(
        &self,
        conversation_id: i64,
        after_id: i64,
    ) -> Result<Vec<Message>, AppError> {
        let mut out: Vec<Message> = self
            .messages
            .lock()
            .iter()
            .filter(|m| m.conversation_id == conversation_id && m.id > after_id)
            .cloned()
            .collect();
        out.sort_by_key(|m| m.id);
        Ok(out)
    }
}

/// Fixed conversation table.
#[derive(Default)]
pub struct InMemoryConversations {
    conversations: Mutex<Vec<Conversation>>,
}

impl InMemoryConversations {
    pub fn with_conversation(id: i64, participant_ids: Vec<i64>) -> Arc<Self> {
        let repo = Self::default();
        repo.conversations.lock().push(Conversation {
            id,
            participant_ids,
            last_message_id: 0,
            created_at: Utc::now(),
        });
        Arc::new(repo)
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversations {
    async fn find_by_id(&self, id: i64) -> Result<Option<Conversation>, AppError> {
        Ok(self
            .conversations
            .lock()
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn is_participant(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> Result<bool, AppError> {
        Ok(self
            .conversations
            .lock()
            .iter()
            .any(|c| c.id == conversation_id && c.is_participant(user_id)))
    }
}

/// In-memory bus: at-most-once per subscriber, no replay, like the real one.
pub struct InMemoryBus {
    sender: broadcast::Sender<FanoutEvent>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }
}

#[async_trait]
impl FanoutBus for InMemoryBus {
    async fn publish(&self, event: &FanoutEvent) -> Result<(), AppError> {
        // No subscribers is not an error: delivery is best-effort
        let _ = self.sender.send(event.clone());
        Ok(())
    }

    fn subscribe(&self) -> mpsc::Receiver<FanoutEvent> {
        let (tx, rx) = mpsc::channel(256);
        let mut source = self.sender.subscribe();
        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        rx
    }
}

/// In-memory durable queue honoring leases and retry times.
#[derive(Default)]
pub struct InMemoryJobQueue {
    pub jobs: Mutex<Vec<Job>>,
    pub fail_enqueue: bool,
}

impl InMemoryJobQueue {
    pub fn job(&self, id: Uuid) -> Option<Job> {
        self.jobs.lock().iter().find(|j| j.id == id).cloned()
    }

    pub fn statuses(&self) -> Vec<JobStatus> {
        self.jobs.lock().iter().map(|j| j.status).collect()
    }

    /// Simulate a lease deadline passing: the job becomes pullable again and
    /// the old owner's token no longer matches.
    pub fn expire_lease(&self, id: Uuid) {
        let mut jobs = self.jobs.lock();
        if let Some(j) = jobs
            .iter_mut()
            .find(|j| j.id == id && j.status == JobStatus::InFlight)
        {
            j.status = JobStatus::Pending;
            j.lease = None;
        }
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: &Job) -> Result<(), AppError> {
        if self.fail_enqueue {
            return Err(AppError::QueueUnavailable("queue offline".into()));
        }
        self.jobs.lock().push(job.clone());
        Ok(())
    }

    async fn pull(&self) -> Result<Option<Job>, AppError> {
        let mut jobs = self.jobs.lock();
        let now = Utc::now();
        let next = jobs
            .iter_mut()
            .find(|j| j.status == JobStatus::Pending && j.next_retry_at <= now);
        Ok(next.map(|j| {
            j.status = JobStatus::InFlight;
            j.lease = Some(Uuid::new_v4());
            j.clone()
        }))
    }

    async fn ack(&self, job: &Job) -> Result<(), AppError> {
        let mut jobs = self.jobs.lock();
        if let Some(j) = jobs.iter_mut().find(|j| {
            j.id == job.id && j.status == JobStatus::InFlight && j.lease == job.lease
        }) {
            j.status = JobStatus::Done;
            j.lease = None;
        }
        Ok(())
    }

    async fn nack(
        &self,
        job: &Job,
        retry_after: Duration,
        error: &str,
    ) -> Result<(), AppError> {
        let mut jobs = self.jobs.lock();
        if let Some(j) = jobs.iter_mut().find(|j| {
            j.id == job.id && j.status == JobStatus::InFlight && j.lease == job.lease
        }) {
            j.status = JobStatus::Pending;
            j.attempts += 1;
            j.next_retry_at =
                Utc::now() + chrono::Duration::from_std(retry_after).unwrap_or_default();
            j.last_error = Some(error.to_string());
            j.lease = None;
        }
        Ok(())
    }

    async fn bury(&self, job: &Job, reason: &str) -> Result<(), AppError> {
        let mut jobs = self.jobs.lock();
        if let Some(j) = jobs.iter_mut().find(|j| {
            j.id == job.id && j.status == JobStatus::InFlight && j.lease == job.lease
        }) {
            j.status = JobStatus::Dead;
            j.attempts += 1;
            j.last_error = Some(reason.to_string());
            j.lease = None;
        }
        Ok(())
    }

    async fn dead_jobs(&self, limit: i64) -> Result<Vec<Job>, AppError> {
        Ok(self
            .jobs
            .lock()
            .iter()
            .filter(|j| j.status == JobStatus::Dead)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

/// Mail transport that always fails; records attempts.
#[derive(Default)]
pub struct FailingMailer {
    pub attempts: Mutex<u32>,
}

#[async_trait]
impl MailSender for FailingMailer {
    async fn send(&self, _kind: JobKind, _payload: &serde_json::Value) -> Result<(), AppError> {
        *self.attempts.lock() += 1;
        Err(AppError::Internal("smtp unreachable".into()))
    }
}

/// Mail transport that always succeeds; records sends.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<(JobKind, serde_json::Value)>>,
}

#[async_trait]
impl MailSender for RecordingMailer {
    async fn send(&self, kind: JobKind, payload: &serde_json::Value) -> Result<(), AppError> {
        self.sent.lock().push((kind, payload.clone()));
        Ok(())
    }
}

/// One simulated service instance: registry, dispatcher, ingest and sync
/// services wired over shared store/bus, with the fanout consumer running.
pub struct TestInstance {
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Arc<DeliveryDispatcher>,
    pub ingest: Arc<IngestService>,
    pub sync: Arc<SyncService>,
    pub instance_id: Uuid,
    consumer: JoinHandle<()>,
}

impl TestInstance {
    pub fn launch(
        store: Arc<InMemoryMessageStore>,
        conversations: Arc<InMemoryConversations>,
        bus: Arc<InMemoryBus>,
    ) -> Self {
        let instance_id = Uuid::new_v4();
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Arc::new(DeliveryDispatcher::new(registry.clone()));

        let ingest = Arc::new(IngestService::new(
            store.clone(),
            conversations.clone(),
            bus.clone(),
            dispatcher.clone(),
            instance_id,
            4000,
        ));
        let sync = Arc::new(SyncService::new(store, conversations));

        let events = bus.subscribe();
        let consumer_dispatcher = dispatcher.clone();
        let consumer = tokio::spawn(async move {
            consumer_dispatcher.run(events).await;
        });

        Self {
            registry,
            dispatcher,
            ingest,
            sync,
            instance_id,
            consumer,
        }
    }

    /// Register a connection for a user, as the gateway handler would.
    pub fn connect(&self, user_id: i64) -> (ConnectionHandle, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(64);
        (self.registry.register(user_id, tx), rx)
    }

    /// The subscribe flow: register the position, reconcile, deliver the
    /// backlog, go live.
    pub async fn subscribe(
        &self,
        handle: &ConnectionHandle,
        conversation_id: i64,
        last_acked_message_id: i64,
    ) -> Result<usize, AppError> {
        self.registry
            .begin_subscription(handle, conversation_id, last_acked_message_id);

        match self
            .sync
            .reconcile(conversation_id, handle.user_id(), last_acked_message_id)
            .await
        {
            Ok(backlog) => {
                for message in &backlog {
                    handle.deliver(message, false);
                }
                self.registry.mark_live(handle, conversation_id);
                Ok(backlog.len())
            }
            Err(e) => {
                self.registry.remove_subscription(handle, conversation_id);
                Err(e)
            }
        }
    }
}

impl Drop for TestInstance {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}

/// Collect the message ids delivered on a connection within the window.
pub async fn delivered_ids(
    rx: &mut mpsc::Receiver<ServerFrame>,
    window: Duration,
) -> Vec<i64> {
    let mut ids = Vec::new();
    loop {
        match tokio::time::timeout(window, rx.recv()).await {
            Ok(Some(ServerFrame::Message(m))) => ids.push(m.id),
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => break,
        }
    }
    ids
}

/// Wait for one message frame, failing the test on timeout.
pub async fn expect_message(rx: &mut mpsc::Receiver<ServerFrame>) -> relay_server::presentation::websocket::frames::MessageFrame {
    loop {
        match tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for message frame")
            .expect("connection channel closed")
        {
            ServerFrame::Message(m) => return m,
            _ => continue,
        }
    }
}
