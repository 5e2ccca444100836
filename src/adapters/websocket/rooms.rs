//! Native room groups for targeted broadcast.
//!
//! A connection that sends `joinRoom` is added to the named room here as
//! well as to its own interest set. `ConnectionGateway::emit_to_room` uses
//! these groups to reach every member of a room directly, bypassing the bus.
//!
//! ```text
//! Room: room-1         Room: class-123
//! ├── conn-a           ├── conn-a
//! ├── conn-b           └── conn-d
//! └── conn-c
//! ```

use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, RwLock};

use crate::domain::foundation::{ConnectionId, RoomId};

use super::messages::ServerFrame;

/// Manages room membership for live connections.
///
/// # Thread Safety
///
/// Uses `RwLock` for the room registry since broadcasts (reads) vastly
/// outnumber joins/leaves (writes).
#[derive(Default)]
pub struct RoomManager {
    /// room → members and their outbound queues
    rooms: RwLock<HashMap<RoomId, HashMap<ConnectionId, mpsc::Sender<ServerFrame>>>>,

    /// connection → joined rooms, for O(rooms) cleanup on disconnect
    memberships: RwLock<HashMap<ConnectionId, HashSet<RoomId>>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection to a room, creating the room if needed.
    ///
    /// Returns `false` if the connection was already a member.
    pub async fn join(
        &self,
        room: &RoomId,
        connection_id: ConnectionId,
        outbound: mpsc::Sender<ServerFrame>,
    ) -> bool {
        let mut rooms = self.rooms.write().await;
        let mut memberships = self.memberships.write().await;

        let members = rooms.entry(room.clone()).or_default();
        let joined = members.insert(connection_id, outbound).is_none();
        memberships
            .entry(connection_id)
            .or_default()
            .insert(room.clone());
        joined
    }

    /// Removes a connection from a room. Empty rooms are dropped.
    ///
    /// Returns `false` if the connection was not a member.
    pub async fn leave(&self, room: &RoomId, connection_id: &ConnectionId) -> bool {
        let mut rooms = self.rooms.write().await;
        let mut memberships = self.memberships.write().await;

        if let Some(joined) = memberships.get_mut(connection_id) {
            joined.remove(room);
            if joined.is_empty() {
                memberships.remove(connection_id);
            }
        }

        remove_member(&mut rooms, room, connection_id)
    }

    /// Removes a connection from every room it joined.
    pub async fn leave_all(&self, connection_id: &ConnectionId) {
        let mut rooms = self.rooms.write().await;
        let mut memberships = self.memberships.write().await;

        if let Some(joined) = memberships.remove(connection_id) {
            for room in &joined {
                remove_member(&mut rooms, room, connection_id);
            }
        }
    }

    /// Queues a frame for every member of a room.
    ///
    /// Members whose queue is full or closed are skipped. Returns the number
    /// of members the frame was queued for.
    pub async fn broadcast(&self, room: &RoomId, frame: ServerFrame) -> usize {
        let rooms = self.rooms.read().await;
        let Some(members) = rooms.get(room) else {
            return 0;
        };

        let mut delivered = 0;
        for (connection_id, outbound) in members {
            match outbound.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        connection_id = %connection_id,
                        room = %room,
                        "Outbound queue full, dropping room frame"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(connection_id = %connection_id, "Room member already closed");
                }
            }
        }
        delivered
    }

    /// Number of connections in a room (0 if it doesn't exist).
    pub async fn member_count(&self, room: &RoomId) -> usize {
        self.rooms.read().await.get(room).map_or(0, HashMap::len)
    }

    /// Rooms with at least one member.
    pub async fn active_rooms(&self) -> Vec<RoomId> {
        self.rooms.read().await.keys().cloned().collect()
    }
}

fn remove_member(
    rooms: &mut HashMap<RoomId, HashMap<ConnectionId, mpsc::Sender<ServerFrame>>>,
    room: &RoomId,
    connection_id: &ConnectionId,
) -> bool {
    let Some(members) = rooms.get_mut(room) else {
        return false;
    };
    let removed = members.remove(connection_id).is_some();
    if members.is_empty() {
        rooms.remove(room);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn room(name: &str) -> RoomId {
        RoomId::new(name).unwrap()
    }

    #[tokio::test]
    async fn join_creates_room_and_is_idempotent() {
        let manager = RoomManager::new();
        let (tx, _rx) = mpsc::channel(4);
        let id = ConnectionId::new();

        assert!(manager.join(&room("room-1"), id, tx.clone()).await);
        assert!(!manager.join(&room("room-1"), id, tx).await);
        assert_eq!(manager.member_count(&room("room-1")).await, 1);
    }

    #[tokio::test]
    async fn broadcast_reaches_only_members() {
        let manager = RoomManager::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        manager.join(&room("room-1"), ConnectionId::new(), tx_a).await;
        manager.join(&room("room-2"), ConnectionId::new(), tx_b).await;

        let delivered = manager
            .broadcast(&room("room-1"), ServerFrame::new("notice", json!({"n": 1})))
            .await;

        assert_eq!(delivered, 1);
        assert_eq!(rx_a.try_recv().unwrap().event, "notice");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_to_unknown_room_is_noop() {
        let manager = RoomManager::new();
        assert_eq!(
            manager
                .broadcast(&room("nobody"), ServerFrame::new("x", json!(null)))
                .await,
            0
        );
    }

    #[tokio::test]
    async fn full_queue_does_not_block_other_members() {
        let manager = RoomManager::new();
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        manager.join(&room("r"), ConnectionId::new(), slow_tx).await;
        manager.join(&room("r"), ConnectionId::new(), fast_tx).await;

        manager.broadcast(&room("r"), ServerFrame::new("a", json!(1))).await;
        let delivered = manager.broadcast(&room("r"), ServerFrame::new("b", json!(2))).await;

        assert_eq!(delivered, 1);
        assert_eq!(fast_rx.try_recv().unwrap().event, "a");
        assert_eq!(fast_rx.try_recv().unwrap().event, "b");
    }

    #[tokio::test]
    async fn leave_drops_empty_room() {
        let manager = RoomManager::new();
        let (tx, _rx) = mpsc::channel(4);
        let id = ConnectionId::new();
        manager.join(&room("room-1"), id, tx).await;

        assert!(manager.leave(&room("room-1"), &id).await);
        assert!(!manager.leave(&room("room-1"), &id).await);
        assert!(manager.active_rooms().await.is_empty());
        assert!(manager.memberships.read().await.is_empty());
    }

    #[tokio::test]
    async fn leave_all_removes_every_membership() {
        let manager = RoomManager::new();
        let (tx, _rx) = mpsc::channel(4);
        let (other_tx, _other_rx) = mpsc::channel(4);
        let id = ConnectionId::new();
        let other = ConnectionId::new();
        manager.join(&room("a"), id, tx.clone()).await;
        manager.join(&room("b"), id, tx).await;
        manager.join(&room("b"), other, other_tx).await;

        manager.leave_all(&id).await;

        assert_eq!(manager.active_rooms().await, vec![room("b")]);
        assert_eq!(manager.member_count(&room("b")).await, 1);
        assert!(!manager.memberships.read().await.contains_key(&id));
    }
}
