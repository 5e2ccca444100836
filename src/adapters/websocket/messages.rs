//! WebSocket message types for real-time event delivery.
//!
//! Every frame in either direction has the shape `{ "event": ..., "data": ... }`:
//! - Server → Client: topic pushes (labelled with the topic string), the
//!   connected greeting, room acknowledgements, pongs, errors
//! - Client → Server: `joinRoom`, `leaveRoom`, `ping`

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::borrow::Cow;
use std::sync::Arc;

use crate::domain::events::EventEnvelope;
use crate::domain::foundation::{ConnectionId, RoomId, Timestamp, UserId};

// ============================================
// Server → Client Messages
// ============================================

pub const CONNECTED_EVENT: &str = "connected";
pub const PONG_EVENT: &str = "pong";
pub const ERROR_EVENT: &str = "error";
pub const JOIN_ROOM_EVENT: &str = "joinRoom";
pub const LEAVE_ROOM_EVENT: &str = "leaveRoom";

/// Frame sent from server to client.
///
/// `data` is shared so a single bus event fanned out to many connections is
/// serialized from one payload allocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerFrame {
    pub event: Cow<'static, str>,
    pub data: Arc<JsonValue>,
}

impl ServerFrame {
    /// Arbitrary labelled frame.
    pub fn new(event: impl Into<Cow<'static, str>>, data: JsonValue) -> Self {
        Self {
            event: event.into(),
            data: Arc::new(data),
        }
    }

    /// Bus push: labelled with the topic, carrying the envelope's payload untouched.
    pub fn from_envelope(envelope: &EventEnvelope) -> Self {
        Self {
            event: Cow::Borrowed(envelope.topic.as_str()),
            data: Arc::clone(&envelope.data),
        }
    }

    /// Greeting sent right after the upgrade.
    pub fn connected(connection_id: &ConnectionId, user_id: &UserId) -> Self {
        Self::new(
            CONNECTED_EVENT,
            json!({
                "connectionId": connection_id.to_string(),
                "userId": user_id.as_str(),
                "timestamp": Timestamp::now().to_rfc3339(),
            }),
        )
    }

    /// Acknowledgement of a `joinRoom` / `leaveRoom` command.
    pub fn room_ack(command: &'static str, room: &RoomId) -> Self {
        Self::new(command, json!({ "room": room.as_str(), "success": true }))
    }

    /// Heartbeat response.
    pub fn pong() -> Self {
        Self::new(
            PONG_EVENT,
            json!({ "timestamp": Timestamp::now().to_rfc3339() }),
        )
    }

    /// Error report; the connection stays open.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(
            ERROR_EVENT,
            json!({ "code": code.as_str(), "message": message.into() }),
        )
    }

    /// JSON text for the socket.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Machine-readable error codes carried by error frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Frame was not valid JSON or not a known command.
    InvalidMessage,
    /// Room identifier was empty or too long.
    InvalidRoom,
    /// Binary frames are not part of the protocol.
    Unsupported,
    /// The connection is already closing.
    ConnectionClosed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidMessage => "INVALID_MESSAGE",
            ErrorCode::InvalidRoom => "INVALID_ROOM",
            ErrorCode::Unsupported => "UNSUPPORTED",
            ErrorCode::ConnectionClosed => "CONNECTION_CLOSED",
        }
    }
}

// ============================================
// Client → Server Messages
// ============================================

/// All commands that can be received from a client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    /// Add a room to the connection's interest set.
    #[serde(rename = "joinRoom")]
    JoinRoom(String),

    /// Remove a room from the connection's interest set.
    #[serde(rename = "leaveRoom")]
    LeaveRoom(String),

    /// Application-level heartbeat.
    #[serde(rename = "ping")]
    Ping,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
