//! Per-client connection state and its bus registrations.
//!
//! ```text
//! Connecting --auth ok--> Active --close()/drop--> Closed
//!      |
//!      +--auth failed--> Rejected (no Connection is ever built)
//! ```
//!
//! A `Connection` owns one listener per topic, registered with the event bus
//! while it is active. Listeners never write to the socket: they push frames
//! onto the connection's bounded outbound queue, which the socket's writer
//! task drains. A full queue drops the frame for this connection only.
//!
//! `close()` unregisters every listener in parallel and leaves every room.
//! It runs at most once. If a `Connection` is dropped without being closed,
//! the same teardown is scheduled on the runtime.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::application::EventBus;
use crate::domain::events::{DeliveryError, EventBusError, EventEnvelope, Topic};
use crate::domain::foundation::{AuthenticatedUser, ConnectionId, RoomId};
use crate::ports::EventListener;

use super::error::GatewayError;
use super::filter::RoomFilter;
use super::messages::ServerFrame;
use super::rooms::RoomManager;

/// Lifecycle of an authenticated connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Active,
    Closed,
}

struct SharedState {
    state: ConnectionState,
    rooms: HashSet<RoomId>,
}

/// The part of a connection its listeners can see.
///
/// Listeners hold this, not the `Connection`, so the bus registry never keeps
/// the connection itself alive.
struct ConnectionCore {
    id: ConnectionId,
    outbound: mpsc::Sender<ServerFrame>,
    filter: Arc<dyn RoomFilter>,
    shared: Mutex<SharedState>,
    closed_tx: watch::Sender<bool>,
}

/// Bus listener bound to one connection.
struct ConnectionListener {
    core: Arc<ConnectionCore>,
    name: String,
}

impl EventListener for ConnectionListener {
    fn on_event(&self, event: &EventEnvelope) -> Result<(), DeliveryError> {
        {
            let shared = self.core.shared.lock();
            if shared.state == ConnectionState::Closed {
                return Err(DeliveryError::ConnectionClosed);
            }
            if !self.core.filter.should_deliver(event, &shared.rooms) {
                return Ok(());
            }
        }

        self.core
            .outbound
            .try_send(ServerFrame::from_envelope(event))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => DeliveryError::ConnectionClosed,
            })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

type Registration = (Topic, Arc<dyn EventListener>);

/// One live client session.
pub struct Connection {
    core: Arc<ConnectionCore>,
    user: AuthenticatedUser,
    registrations: Mutex<Vec<Registration>>,
    bus: Arc<EventBus>,
    rooms: Arc<RoomManager>,
}

impl Connection {
    pub(crate) fn new(
        user: AuthenticatedUser,
        outbound: mpsc::Sender<ServerFrame>,
        filter: Arc<dyn RoomFilter>,
        bus: Arc<EventBus>,
        rooms: Arc<RoomManager>,
    ) -> Self {
        Self {
            core: Arc::new(ConnectionCore {
                id: ConnectionId::new(),
                outbound,
                filter,
                shared: Mutex::new(SharedState {
                    state: ConnectionState::Active,
                    rooms: HashSet::new(),
                }),
                closed_tx: watch::channel(false).0,
            }),
            user,
            registrations: Mutex::new(Vec::new()),
            bus,
            rooms,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.core.id
    }

    pub fn user(&self) -> &AuthenticatedUser {
        &self.user
    }

    pub fn state(&self) -> ConnectionState {
        self.core.shared.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Resolves to `true` once the connection is closed, so the socket
    /// tasks can stop.
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.core.closed_tx.subscribe()
    }

    /// Snapshot of the rooms this connection has joined.
    pub fn rooms(&self) -> HashSet<RoomId> {
        self.core.shared.lock().rooms.clone()
    }

    /// Number of `(topic, listener)` pairs currently registered.
    pub fn registration_count(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Queues a frame for this client outside the bus (acks, pongs, errors).
    pub fn send(&self, frame: ServerFrame) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::ConnectionClosed);
        }
        self.core.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::ConnectionClosed,
        })
    }

    /// Registers one listener per topic with the bus.
    ///
    /// On any failure the registrations made so far are rolled back and the
    /// connection is closed.
    pub(crate) async fn register_all(&self) -> Result<(), GatewayError> {
        for topic in Topic::all() {
            let listener: Arc<dyn EventListener> = Arc::new(ConnectionListener {
                core: Arc::clone(&self.core),
                name: format!("connection:{}", self.core.id),
            });

            if let Err(e) = self.bus.subscribe(topic, Arc::clone(&listener)).await {
                tracing::warn!(
                    connection_id = %self.core.id,
                    topic = %topic,
                    error = %e,
                    "Subscription failed, rolling back connection"
                );
                self.close().await;
                return Err(GatewayError::Subscribe(e));
            }

            // Lock order: shared state, then registrations.
            let closed = {
                let shared = self.core.shared.lock();
                if shared.state == ConnectionState::Closed {
                    true
                } else {
                    self.registrations.lock().push((topic, Arc::clone(&listener)));
                    false
                }
            };
            if closed {
                unsubscribe_with_retry(&self.bus, self.core.id, topic, &listener).await;
                return Err(GatewayError::ConnectionClosed);
            }
        }

        tracing::debug!(
            connection_id = %self.core.id,
            topics = self.registration_count(),
            "Connection registered for all topics"
        );
        Ok(())
    }

    /// Adds a room to the interest set and the native room group.
    ///
    /// Returns `false` if already joined.
    pub async fn join_room(&self, room: RoomId) -> Result<bool, GatewayError> {
        let newly_joined = {
            let mut shared = self.core.shared.lock();
            if shared.state == ConnectionState::Closed {
                return Err(GatewayError::ConnectionClosed);
            }
            shared.rooms.insert(room.clone())
        };

        self.rooms
            .join(&room, self.core.id, self.core.outbound.clone())
            .await;

        // A close that ran while we joined the room group has already swept
        // the group; undo our late membership.
        if self.is_closed() {
            self.rooms.leave(&room, &self.core.id).await;
            return Err(GatewayError::ConnectionClosed);
        }

        tracing::debug!(connection_id = %self.core.id, room = %room, "Joined room");
        Ok(newly_joined)
    }

    /// Removes a room from the interest set and the native room group.
    ///
    /// Returns `false` if the room was not joined.
    pub async fn leave_room(&self, room: &RoomId) -> Result<bool, GatewayError> {
        let was_joined = {
            let mut shared = self.core.shared.lock();
            if shared.state == ConnectionState::Closed {
                return Err(GatewayError::ConnectionClosed);
            }
            shared.rooms.remove(room)
        };

        self.rooms.leave(room, &self.core.id).await;
        tracing::debug!(connection_id = %self.core.id, room = %room, "Left room");
        Ok(was_joined)
    }

    /// Tears the connection down. Idempotent.
    ///
    /// After the first call returns, no listener of this connection remains
    /// registered and the connection is in no room.
    pub async fn close(&self) {
        let Some(registrations) = self.begin_close() else {
            return;
        };
        teardown(
            Arc::clone(&self.bus),
            Arc::clone(&self.rooms),
            self.core.id,
            registrations,
        )
        .await;
    }

    /// Marks the connection closed and takes its registrations. `None` if it
    /// was already closed.
    fn begin_close(&self) -> Option<Vec<Registration>> {
        let mut shared = self.core.shared.lock();
        if shared.state == ConnectionState::Closed {
            return None;
        }
        shared.state = ConnectionState::Closed;
        shared.rooms.clear();
        self.core.closed_tx.send_replace(true);
        Some(std::mem::take(&mut *self.registrations.lock()))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let Some(registrations) = self.begin_close() else {
            return;
        };

        tracing::debug!(connection_id = %self.core.id, "Connection dropped without close");
        let cleanup = teardown(
            Arc::clone(&self.bus),
            Arc::clone(&self.rooms),
            self.core.id,
            registrations,
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(cleanup);
            }
            // Teardown only touches in-process maps, so it completes without
            // a reactor.
            Err(_) => futures::executor::block_on(cleanup),
        }
    }
}

async fn teardown(
    bus: Arc<EventBus>,
    rooms: Arc<RoomManager>,
    id: ConnectionId,
    registrations: Vec<Registration>,
) {
    rooms.leave_all(&id).await;

    let count = registrations.len();
    join_all(
        registrations
            .iter()
            .map(|(topic, listener)| unsubscribe_with_retry(&bus, id, *topic, listener)),
    )
    .await;

    tracing::debug!(connection_id = %id, listeners = count, "Connection closed");
}

async fn unsubscribe_with_retry(
    bus: &EventBus,
    id: ConnectionId,
    topic: Topic,
    listener: &Arc<dyn EventListener>,
) {
    for attempt in 1..=2 {
        match bus.unsubscribe(topic, listener).await {
            Ok(_) => return,
            // A bus that is not running holds no listeners.
            Err(EventBusError::NotInitialized) => return,
            Err(e) if attempt == 1 => {
                tracing::warn!(
                    connection_id = %id,
                    topic = %topic,
                    error = %e,
                    "Unsubscribe failed, retrying"
                );
            }
            Err(e) => {
                tracing::error!(
                    connection_id = %id,
                    topic = %topic,
                    error = %e,
                    "Unsubscribe failed, listener may leak"
                );
            }
        }
    }
}
