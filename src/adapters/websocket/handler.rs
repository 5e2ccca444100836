//! WebSocket upgrade handler for real-time event connections.
//!
//! Handles the HTTP → WebSocket upgrade and drives the connection lifecycle:
//! 1. Validate the bearer credential (before upgrading; 401 otherwise)
//! 2. Upgrade to WebSocket
//! 3. Register the connection for every topic and send the greeting
//! 4. Pump outbound frames and client commands until either side stops
//! 5. Unregister everything
//!
//! Keepalive: the server pings every `ping_interval`; a client that sends
//! nothing (not even a pong) for `ping_timeout` is disconnected.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        FromRequestParts, Query, State,
    },
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use crate::domain::foundation::AuthenticatedUser;

use super::connection::Connection;
use super::error::GatewayError;
use super::gateway::{ConnectionGateway, ConnectionSession};
use super::messages::{ClientMessage, ErrorCode, ServerFrame};

/// Create the axum router for the event socket and health check.
///
/// # Routes
///
/// - `GET /events` - WebSocket endpoint (`Authorization: Bearer` or `?token=`)
/// - `GET /health` - Backend name and live connection count
pub fn events_router(gateway: Arc<ConnectionGateway>) -> Router {
    Router::new()
        .route("/events", get(events_handler))
        .route("/health", get(health_handler))
        .with_state(gateway)
}

/// Authenticated user of an incoming socket request.
///
/// Rejects with 401 before any upgrade when the credential is missing or
/// invalid.
#[derive(Debug, Clone)]
pub struct SocketUser(pub AuthenticatedUser);

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

#[async_trait]
impl FromRequestParts<Arc<ConnectionGateway>> for SocketUser {
    type Rejection = GatewayError;

    async fn from_request_parts(
        parts: &mut Parts,
        gateway: &Arc<ConnectionGateway>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).or_else(|| {
            Query::<TokenQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(query)| query.token)
        });

        gateway.authenticate(token.as_deref()).await.map(SocketUser)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Handle WebSocket upgrade requests.
///
/// Route: `GET /events`
async fn events_handler(
    State(gateway): State<Arc<ConnectionGateway>>,
    SocketUser(user): SocketUser,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_failed_upgrade(|e| tracing::debug!(error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| handle_socket(socket, gateway, user))
}

/// Handle an established WebSocket connection until it ends.
async fn handle_socket(socket: WebSocket, gateway: Arc<ConnectionGateway>, user: AuthenticatedUser) {
    let ConnectionSession {
        connection,
        outbound,
    } = match gateway.connect(user).await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(error = %e, "Could not register connection");
            let _ = socket.close().await;
            return;
        }
    };

    let (sender, receiver) = socket.split();
    let greeting = ServerFrame::connected(&connection.id(), &connection.user().id);
    if let Err(e) = connection.send(greeting) {
        tracing::debug!(connection_id = %connection.id(), error = %e, "Failed to queue greeting");
    }

    let ping_interval = gateway.config().ping_interval();
    let ping_timeout = gateway.config().ping_timeout();

    let mut send_task = tokio::spawn(write_frames(
        sender,
        outbound,
        Arc::clone(&connection),
        ping_interval,
    ));
    let mut recv_task = tokio::spawn(read_commands(
        receiver,
        Arc::clone(&gateway),
        Arc::clone(&connection),
        ping_timeout,
    ));

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.disconnect(&connection).await;
}

/// Drains the outbound queue onto the socket and sends keepalive pings.
async fn write_frames(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerFrame>,
    connection: Arc<Connection>,
    ping_interval: time::Duration,
) {
    let connection_id = connection.id();
    let mut closed = connection.closed_signal();
    let mut ping = time::interval_at(Instant::now() + ping_interval, ping_interval);
    drop(connection);

    if *closed.borrow() {
        return;
    }

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let text = match frame.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(connection_id = %connection_id, error = %e, "Unserializable frame dropped");
                        continue;
                    }
                };
                if let Err(e) = sender.send(Message::Text(text)).await {
                    tracing::debug!(connection_id = %connection_id, "Send error, closing connection: {}", e);
                    break;
                }
            }
            _ = ping.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            _ = closed.changed() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

/// Handles incoming frames until the client leaves or goes silent.
async fn read_commands(
    mut receiver: futures::stream::SplitStream<WebSocket>,
    gateway: Arc<ConnectionGateway>,
    connection: Arc<Connection>,
    ping_timeout: time::Duration,
) {
    let connection_id = connection.id();

    loop {
        let next = match time::timeout(ping_timeout, receiver.next()).await {
            Ok(next) => next,
            Err(_) => {
                tracing::debug!(connection_id = %connection_id, "Client timed out");
                break;
            }
        };

        let reply = match next {
            Some(Ok(Message::Text(text))) => match ClientMessage::parse(&text) {
                Ok(command) => gateway.handle_command(&connection, command).await,
                Err(e) => ServerFrame::error(ErrorCode::InvalidMessage, e.to_string()),
            },
            Some(Ok(Message::Binary(_))) => {
                tracing::warn!(connection_id = %connection_id, "Received unsupported binary message");
                ServerFrame::error(ErrorCode::Unsupported, "binary frames are not supported")
            }
            // Protocol-level ping/pong only refresh the timeout
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) => {
                tracing::debug!(connection_id = %connection_id, "Client sent close frame");
                break;
            }
            Some(Err(e)) => {
                tracing::debug!(connection_id = %connection_id, "Receive error: {}", e);
                break;
            }
            None => break,
        };

        if let Err(e) = connection.send(reply) {
            tracing::warn!(connection_id = %connection_id, error = %e, "Reply dropped");
        }
    }
}

/// Health check.
///
/// Route: `GET /health`
async fn health_handler(State(gateway): State<Arc<ConnectionGateway>>) -> impl IntoResponse {
    let bus = gateway.bus();
    let (status, label) = if bus.is_running() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };

    (
        status,
        Json(serde_json::json!({
            "status": label,
            "backend": bus.backend_name(),
            "connections": gateway.active_connections(),
        })),
    )
}
