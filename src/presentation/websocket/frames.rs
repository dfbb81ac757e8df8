//! Gateway Frame Types
//!
//! Wire formats for the bidirectional client protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::domain::Message;
use crate::shared::error::AppError;

/// Client → server frames
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Submit a message to a conversation
    #[serde(rename = "send")]
    Send(SendPayload),

    /// Subscribe to a conversation, declaring the last acked position
    #[serde(rename = "subscribe")]
    Subscribe(SubscribePayload),

    /// Keepalive; silence beyond the heartbeat window drops the connection
    #[serde(rename = "heartbeat")]
    Heartbeat,
}

/// `send` frame payload
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendPayload {
    pub conversation_id: i64,

    #[validate(length(min = 1, message = "body must not be empty"))]
    pub body: String,
}

/// `subscribe` frame payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribePayload {
    pub conversation_id: i64,

    /// 0 for a fresh subscription with no history
    #[serde(default)]
    pub last_acked_message_id: i64,
}

/// Server → client frames
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// A delivered message (live fanout or reconciliation backlog)
    #[serde(rename = "message")]
    Message(MessageFrame),

    /// Acknowledges a successful `send` with the allocated id
    #[serde(rename = "ack")]
    #[serde(rename_all = "camelCase")]
    Ack {
        message_id: i64,
        conversation_id: i64,
    },

    /// Business-rule or infrastructure failure surfaced to the client
    #[serde(rename = "error")]
    Error { kind: String, detail: String },
}

/// Message payload on the wire
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFrame {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Message> for MessageFrame {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            body: message.body.clone(),
            created_at: message.created_at,
        }
    }
}

impl ServerFrame {
    pub fn message(message: &Message) -> Self {
        Self::Message(MessageFrame::from(message))
    }

    pub fn ack(message: &Message) -> Self {
        Self::Ack {
            message_id: message.id,
            conversation_id: message.conversation_id,
        }
    }

    pub fn error(err: &AppError) -> Self {
        Self::Error {
            kind: err.wire_kind().to_string(),
            detail: err.wire_detail(),
        }
    }
}
