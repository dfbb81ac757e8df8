//! Gateway Connection Handler
//!
//! One task per connection reads the inbound frame stream; a sibling writer
//! task drains the bounded outbound channel. A stalled client fills only its
//! own buffer and never stalls fanout to other connections.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::interval;
use validator::Validate;

use super::frames::{ClientFrame, SendPayload, ServerFrame, SubscribePayload};
use super::registry::ConnectionHandle;
use crate::shared::error::AppError;
use crate::startup::AppState;

/// Claims in tokens issued by the external identity service
#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[allow(dead_code)]
    exp: usize,
}

#[derive(Debug, Deserialize)]
pub struct GatewayParams {
    token: Option<String>,
}

/// WebSocket upgrade handler. The identity token is verified before the
/// upgrade completes; an unidentified socket is never registered.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<GatewayParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let token = match bearer_token(&params, &headers) {
        Some(token) => token,
        None => {
            return AppError::Unauthorized("missing identity token".into()).into_response();
        }
    };

    let user_id = match verify_token(&token, &state.settings.auth.jwt_secret) {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };

    ws.max_message_size(state.settings.gateway.max_frame_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

fn bearer_token(params: &GatewayParams, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = &params.token {
        return Some(token.clone());
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Verify an externally-issued identity token and extract the user id.
fn verify_token(token: &str, secret: &str) -> Result<i64, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::Unauthorized(format!("invalid token: {}", e)))?;

    token_data
        .claims
        .sub
        .parse::<i64>()
        .map_err(|_| AppError::Unauthorized("invalid subject in token".into()))
}

/// Handle one identified connection until disconnect or heartbeat timeout.
async fn handle_socket(socket: WebSocket, state: AppState, user_id: i64) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<ServerFrame>(state.settings.gateway.outbound_buffer);

    // Writer task: the only place that touches the socket sink
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!("Failed to serialize frame: {}", e);
                    continue;
                }
            };
            if sender.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let handle = state.registry.register(user_id, tx);

    tracing::info!(
        user_id = user_id,
        connection_id = %handle.id(),
        "Gateway connection established"
    );

    let heartbeat_window = Duration::from_secs(state.settings.gateway.heartbeat_window_secs);
    let mut heartbeat_check = interval(heartbeat_window / 2);
    heartbeat_check.tick().await; // Skip first immediate tick

    loop {
        tokio::select! {
            // Inbound frames
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_frame(&text, &state, &handle).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        tracing::debug!(connection_id = %handle.id(), "Connection closed");
                        break;
                    }
                    Some(Ok(WsMessage::Ping(_))) => {
                        // Pong is handled automatically by axum
                    }
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %handle.id(), error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }

            // Heartbeat window enforcement
            _ = heartbeat_check.tick() => {
                if !handle.is_alive(heartbeat_window) {
                    tracing::info!(
                        connection_id = %handle.id(),
                        "Heartbeat timeout, closing connection"
                    );
                    break;
                }
            }
        }
    }

    // In-flight pushes die with the channel; other recipients are unaffected
    state.registry.unregister(&handle);
    writer_task.abort();

    tracing::info!(
        user_id = user_id,
        connection_id = %handle.id(),
        "Gateway connection closed"
    );
}

/// Decode and dispatch one inbound frame. Business-rule failures become
/// `error` frames on this connection; they are never retried server-side.
async fn handle_frame(text: &str, state: &AppState, handle: &ConnectionHandle) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            let err = AppError::InvalidMessage(format!("malformed frame: {}", e));
            handle.send_frame(ServerFrame::error(&err));
            return;
        }
    };

    match frame {
        ClientFrame::Heartbeat => {
            handle.heartbeat();
            tracing::trace!(connection_id = %handle.id(), "Heartbeat received");
        }
        ClientFrame::Send(payload) => handle_send(state, handle, payload).await,
        ClientFrame::Subscribe(payload) => handle_subscribe(state, handle, payload).await,
    }
}

async fn handle_send(state: &AppState, handle: &ConnectionHandle, payload: SendPayload) {
    if let Err(e) = payload.validate() {
        let err = AppError::InvalidMessage(e.to_string());
        handle.send_frame(ServerFrame::error(&err));
        return;
    }

    match state
        .ingest
        .submit(payload.conversation_id, handle.user_id(), &payload.body)
        .await
    {
        Ok(message) => {
            // The sender's ack carries the allocated id; the message frame
            // itself arrives through the normal delivery path
            handle.send_frame(ServerFrame::ack(&message));
        }
        Err(e) => {
            handle.send_frame(ServerFrame::error(&e));
        }
    }
}

/// Subscribe flow: register the subscription at the client's declared
/// position, deliver the reconciled backlog directly, then go live. Live
/// fanout arriving while reconciliation runs is buffered by the registry and
/// flushed on the flip to live, so nothing published in that window is lost;
/// the per-connection high-water mark makes the handover idempotent.
async fn handle_subscribe(state: &AppState, handle: &ConnectionHandle, payload: SubscribePayload) {
    state.registry.begin_subscription(
        handle,
        payload.conversation_id,
        payload.last_acked_message_id,
    );

    match state
        .sync
        .reconcile(
            payload.conversation_id,
            handle.user_id(),
            payload.last_acked_message_id,
        )
        .await
    {
        Ok(backlog) => {
            for message in &backlog {
                handle.deliver(message, false);
            }
            state.registry.mark_live(handle, payload.conversation_id);

            tracing::debug!(
                connection_id = %handle.id(),
                conversation_id = payload.conversation_id,
                backlog = backlog.len(),
                "Subscription live"
            );
        }
        Err(e) => {
            state
                .registry
                .remove_subscription(handle, payload.conversation_id);
            handle.send_frame(ServerFrame::error(&e));
        }
    }
}
