//! Mail Transport
//!
//! The real transport is an external collaborator reached through the
//! `MailSender` contract. `LogMailer` is the standalone/development stand-in:
//! it records the dispatch in the structured log and succeeds.

use async_trait::async_trait;
use tracing::info;

use crate::domain::{JobKind, MailSender};
use crate::shared::error::AppError;

/// Development mail transport: logs instead of sending.
pub struct LogMailer;

#[async_trait]
impl MailSender for LogMailer {
    async fn send(&self, kind: JobKind, payload: &serde_json::Value) -> Result<(), AppError> {
        info!(kind = %kind, payload = %payload, "Mail dispatched (log transport)");
        Ok(())
    }
}
