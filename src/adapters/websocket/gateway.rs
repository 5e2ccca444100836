//! ConnectionGateway - authenticates clients and manages their connections.
//!
//! The gateway owns every per-connection listener lifetime. The event bus
//! only sees listeners; it never holds a connection.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use crate::application::EventBus;
use crate::config::GatewayConfig;
use crate::domain::foundation::{AuthError, AuthenticatedUser, ConnectionId, RoomId};
use crate::ports::SessionValidator;

use super::connection::Connection;
use super::error::GatewayError;
use super::filter::{AcceptAll, RoomFilter};
use super::messages::{ClientMessage, ErrorCode, ServerFrame, JOIN_ROOM_EVENT, LEAVE_ROOM_EVENT};
use super::rooms::RoomManager;

/// An opened connection and the receiving end of its outbound queue.
///
/// The socket writer drains `outbound`; everything else goes through
/// `connection`.
pub struct ConnectionSession {
    pub connection: Arc<Connection>,
    pub outbound: mpsc::Receiver<ServerFrame>,
}

/// Entry point for client connections.
pub struct ConnectionGateway {
    bus: Arc<EventBus>,
    validator: Arc<dyn SessionValidator>,
    rooms: Arc<RoomManager>,
    filter: Arc<dyn RoomFilter>,
    config: GatewayConfig,
    connections: RwLock<HashMap<ConnectionId, Weak<Connection>>>,
}

impl ConnectionGateway {
    pub fn new(
        bus: Arc<EventBus>,
        validator: Arc<dyn SessionValidator>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            bus,
            validator,
            rooms: Arc::new(RoomManager::new()),
            filter: Arc::new(AcceptAll),
            config,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the default accept-everything delivery filter.
    pub fn with_filter(mut self, filter: Arc<dyn RoomFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }

    /// Validates a handshake credential. A missing or blank token is
    /// rejected without consulting the validator.
    pub async fn authenticate(
        &self,
        token: Option<&str>,
    ) -> Result<AuthenticatedUser, GatewayError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(GatewayError::Rejected(AuthError::MissingCredential))?;

        self.validator.validate(token).await.map_err(|e| {
            tracing::debug!(error = %e, "Handshake rejected");
            GatewayError::Rejected(e)
        })
    }

    /// Builds a connection for an authenticated user and registers it for
    /// every topic.
    pub async fn connect(&self, user: AuthenticatedUser) -> Result<ConnectionSession, GatewayError> {
        let (tx, rx) = mpsc::channel(self.config.outbound_capacity);
        let connection = Arc::new(Connection::new(
            user,
            tx,
            Arc::clone(&self.filter),
            Arc::clone(&self.bus),
            Arc::clone(&self.rooms),
        ));

        connection.register_all().await?;
        self.connections
            .write()
            .insert(connection.id(), Arc::downgrade(&connection));

        tracing::debug!(
            connection_id = %connection.id(),
            user_id = %connection.user().id,
            "Client connected"
        );
        Ok(ConnectionSession {
            connection,
            outbound: rx,
        })
    }

    /// Authenticates and connects in one step.
    pub async fn open(&self, token: Option<&str>) -> Result<ConnectionSession, GatewayError> {
        let user = self.authenticate(token).await?;
        self.connect(user).await
    }

    pub async fn join_room(
        &self,
        connection: &Connection,
        room: RoomId,
    ) -> Result<bool, GatewayError> {
        connection.join_room(room).await
    }

    pub async fn leave_room(
        &self,
        connection: &Connection,
        room: &RoomId,
    ) -> Result<bool, GatewayError> {
        connection.leave_room(room).await
    }

    /// Executes one client command and returns the frame to answer with.
    pub async fn handle_command(&self, connection: &Connection, command: ClientMessage) -> ServerFrame {
        match command {
            ClientMessage::JoinRoom(raw) => match RoomId::new(raw) {
                Ok(room) => match self.join_room(connection, room.clone()).await {
                    Ok(_) => ServerFrame::room_ack(JOIN_ROOM_EVENT, &room),
                    Err(e) => ServerFrame::error(ErrorCode::ConnectionClosed, e.to_string()),
                },
                Err(e) => ServerFrame::error(ErrorCode::InvalidRoom, e.to_string()),
            },
            ClientMessage::LeaveRoom(raw) => match RoomId::new(raw) {
                Ok(room) => match self.leave_room(connection, &room).await {
                    Ok(_) => ServerFrame::room_ack(LEAVE_ROOM_EVENT, &room),
                    Err(e) => ServerFrame::error(ErrorCode::ConnectionClosed, e.to_string()),
                },
                Err(e) => ServerFrame::error(ErrorCode::InvalidRoom, e.to_string()),
            },
            ClientMessage::Ping => ServerFrame::pong(),
        }
    }

    /// Closes a connection and forgets it. Idempotent.
    pub async fn disconnect(&self, connection: &Connection) {
        connection.close().await;
        self.connections.write().remove(&connection.id());
        tracing::debug!(connection_id = %connection.id(), "Client disconnected");
    }

    /// Pushes a frame to every connection that joined `room`.
    ///
    /// Returns the number of connections it was queued for.
    pub async fn emit_to_room(
        &self,
        room: &RoomId,
        event: impl Into<String>,
        data: JsonValue,
    ) -> usize {
        self.rooms
            .broadcast(room, ServerFrame::new(event.into(), data))
            .await
    }

    /// Live connections, pruning any that were dropped without `disconnect`.
    pub fn active_connections(&self) -> usize {
        let mut connections = self.connections.write();
        connections.retain(|_, weak| weak.strong_count() > 0);
        connections.len()
    }

    /// Closes every live connection.
    pub async fn shutdown(&self) {
        let live: Vec<Arc<Connection>> = self
            .connections
            .write()
            .drain()
            .filter_map(|(_, weak)| weak.upgrade())
            .collect();

        let count = live.len();
        join_all(live.iter().map(|connection| connection.close())).await;
        tracing::info!(connections = count, "Gateway closed all connections");
    }
}
