//! EventTransport port - Backend strategy behind the event bus facade.
//!
//! The facade picks one implementation at construction and never switches:
//!
//! - `LocalDispatcher` - synchronous, in-process, single instance
//! - `RedisStreamTransport` - durable broker with a consumer group
//!
//! A further broker is added by implementing this trait; the facade and the
//! gateway stay untouched.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::events::{EventBusError, EventEnvelope, Topic};

use super::EventListener;

/// Backend that moves envelopes from publishers to locally registered listeners.
///
/// Listeners live in a `ListenerRegistry` injected at construction; the
/// facade holds the same registry for introspection.
///
/// Implementations must ensure:
/// - `start` completes every broker-side registration before any message is
///   consumed
/// - a listener removed by `unsubscribe` is not invoked by any dispatch that
///   begins after the call returns
/// - `publish` is bounded in time; failures surface as `PublishFailed`
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Short backend name for logs and health output.
    fn name(&self) -> &'static str;

    /// Connect and begin delivering. Called once by the facade.
    async fn start(&self) -> Result<(), EventBusError>;

    /// Deliver an envelope to every listener of its topic (in this process
    /// for the local backend, in every consumer group member for a broker).
    async fn publish(&self, event: EventEnvelope) -> Result<(), EventBusError>;

    /// Register a listener for a topic. Registering the same instance twice
    /// is a no-op.
    async fn subscribe(
        &self,
        topic: Topic,
        listener: Arc<dyn EventListener>,
    ) -> Result<(), EventBusError>;

    /// Remove a listener. Returns `false` if it was not registered.
    async fn unsubscribe(
        &self,
        topic: Topic,
        listener: &Arc<dyn EventListener>,
    ) -> Result<bool, EventBusError>;

    /// Stop delivering, disconnect, and drop every registered listener.
    async fn shutdown(&self) -> Result<(), EventBusError>;
}
