//! Local dispatcher - synchronous, in-process event delivery.
//!
//! Publishing invokes every registered listener on the caller's task before
//! returning. There is no serialization, no network hop and no visibility to
//! other processes, so this backend is only correct for single-instance
//! deployments (local development, tests).

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::events::{EventBusError, EventEnvelope, Topic};
use crate::ports::{EventListener, EventTransport};

use super::registry::ListenerRegistry;

/// In-process transport backed directly by the listener registry.
///
/// # Example
///
/// ```ignore
/// let registry = Arc::new(ListenerRegistry::new());
/// let dispatcher = LocalDispatcher::new(registry.clone());
///
/// dispatcher.subscribe(Topic::PostUpdated, listener).await?;
/// dispatcher.publish(envelope).await?; // listener has run when this returns
/// ```
pub struct LocalDispatcher {
    registry: Arc<ListenerRegistry>,
}

impl LocalDispatcher {
    pub fn new(registry: Arc<ListenerRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl EventTransport for LocalDispatcher {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn start(&self) -> Result<(), EventBusError> {
        tracing::info!("Local event dispatcher ready (single-instance mode)");
        Ok(())
    }

    async fn publish(&self, event: EventEnvelope) -> Result<(), EventBusError> {
        let report = self.registry.dispatch(&event);
        tracing::trace!(
            topic = %event.topic,
            delivered = report.delivered,
            failed = report.failed,
            "Dispatched event locally"
        );
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: Topic,
        listener: Arc<dyn EventListener>,
    ) -> Result<(), EventBusError> {
        if !self.registry.insert(topic, listener) {
            tracing::debug!(topic = %topic, "Listener already subscribed");
        }
        Ok(())
    }

    async fn unsubscribe(
        &self,
        topic: Topic,
        listener: &Arc<dyn EventListener>,
    ) -> Result<bool, EventBusError> {
        Ok(self.registry.remove(topic, listener))
    }

    async fn shutdown(&self) -> Result<(), EventBusError> {
        self.registry.clear();
        Ok(())
    }
}
