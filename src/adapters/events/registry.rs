//! Topic → listener registry shared by every transport.
//!
//! One registry is owned by each transport instance. Nothing here is global:
//! the registry is created with the transport and cleared on shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::domain::events::{DeliveryError, EventEnvelope, Topic};
use crate::ports::{EventListener, ListenerId};

/// Outcome of dispatching one envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Listeners that accepted the event.
    pub delivered: usize,
    /// Listeners that returned an error.
    pub failed: usize,
}

/// Concurrent-safe map of topic → set of listeners.
///
/// # Thread Safety
///
/// Uses an `RwLock` since dispatches (reads) vastly outnumber subscribe and
/// unsubscribe (writes). Dispatch clones the topic's listener set and
/// releases the lock before invoking anyone, so a listener may itself
/// subscribe or unsubscribe without deadlocking.
#[derive(Default)]
pub struct ListenerRegistry {
    topics: RwLock<HashMap<Topic, HashMap<ListenerId, Arc<dyn EventListener>>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener. Returns `false` if this instance was already registered
    /// for the topic.
    pub fn insert(&self, topic: Topic, listener: Arc<dyn EventListener>) -> bool {
        let id = ListenerId::of(&listener);
        let mut topics = self.topics.write();
        let listeners = topics.entry(topic).or_default();
        if listeners.contains_key(&id) {
            return false;
        }
        listeners.insert(id, listener);
        true
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn remove(&self, topic: Topic, listener: &Arc<dyn EventListener>) -> bool {
        let id = ListenerId::of(listener);
        let mut topics = self.topics.write();
        let Some(listeners) = topics.get_mut(&topic) else {
            return false;
        };
        let removed = listeners.remove(&id).is_some();
        if listeners.is_empty() {
            topics.remove(&topic);
        }
        removed
    }

    /// Snapshot of the listeners registered for a topic.
    pub fn listeners_for(&self, topic: Topic) -> Vec<Arc<dyn EventListener>> {
        self.topics
            .read()
            .get(&topic)
            .map(|listeners| listeners.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Invokes every listener of the envelope's topic.
    ///
    /// A failing listener is logged and skipped; the rest still receive the
    /// event.
    pub fn dispatch(&self, event: &EventEnvelope) -> DispatchReport {
        let mut report = DispatchReport::default();

        for listener in self.listeners_for(event.topic) {
            match listener.on_event(event) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::ConnectionClosed) => {
                    report.failed += 1;
                    tracing::debug!(
                        topic = %event.topic,
                        listener = listener.name(),
                        "Listener's connection already closed"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        topic = %event.topic,
                        listener = listener.name(),
                        error = %e,
                        "Listener failed to accept event"
                    );
                }
            }
        }

        report
    }

    pub fn listener_count(&self, topic: Topic) -> usize {
        self.topics.read().get(&topic).map_or(0, HashMap::len)
    }

    pub fn total_listeners(&self) -> usize {
        self.topics.read().values().map(HashMap::len).sum()
    }

    /// Drops every registration.
    pub fn clear(&self) {
        self.topics.write().clear();
    }
}
