//! Per-connection delivery filter.
//!
//! Every bus event bound for a connection is offered to the gateway's
//! `RoomFilter` together with the rooms the connection has joined. Only
//! events the filter accepts are queued for the client.

use std::collections::HashSet;

use crate::domain::events::EventEnvelope;
use crate::domain::foundation::RoomId;

/// Decides whether a connection receives an event.
///
/// Runs on the dispatch path for every (event, connection) pair while the
/// connection's state lock is held, so it must be cheap and must not block.
pub trait RoomFilter: Send + Sync {
    fn should_deliver(&self, event: &EventEnvelope, rooms: &HashSet<RoomId>) -> bool;
}

/// Delivers every event regardless of joined rooms; clients filter locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl RoomFilter for AcceptAll {
    fn should_deliver(&self, _event: &EventEnvelope, _rooms: &HashSet<RoomId>) -> bool {
        true
    }
}

impl<F> RoomFilter for F
where
    F: Fn(&EventEnvelope, &HashSet<RoomId>) -> bool + Send + Sync,
{
    fn should_deliver(&self, event: &EventEnvelope, rooms: &HashSet<RoomId>) -> bool {
        self(event, rooms)
    }
}
