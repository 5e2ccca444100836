//! EventListener port - Callback invoked for every event on a subscribed topic.

use std::fmt;
use std::sync::Arc;

use crate::domain::events::{DeliveryError, EventEnvelope};

/// Handler for events delivered by the bus.
///
/// Implementations must be:
/// - **Non-blocking** - the local dispatcher calls them on the publisher's
///   task and the broker consumer calls them on its receive loop; anything
///   slow belongs on a queue drained elsewhere
/// - **Isolated** - a returned error is logged by the dispatcher and does not
///   affect other listeners
///
/// # Example
///
/// ```ignore
/// struct AuditTrail { /* ... */ }
///
/// impl EventListener for AuditTrail {
///     fn on_event(&self, event: &EventEnvelope) -> Result<(), DeliveryError> {
///         self.queue.try_send(event.clone()).map_err(|_| DeliveryError::QueueFull)
///     }
///
///     fn name(&self) -> &str {
///         "AuditTrail"
///     }
/// }
/// ```
pub trait EventListener: Send + Sync {
    /// Accept one event.
    fn on_event(&self, event: &EventEnvelope) -> Result<(), DeliveryError>;

    /// Listener name for logging.
    fn name(&self) -> &str;
}

/// Identity of a registered listener instance.
///
/// Two `Arc`s pointing at the same allocation share an identity, so
/// subscribing the same listener twice to a topic is a no-op and
/// `unsubscribe` can be called with any clone of the subscribed `Arc`.
/// The registry keeps the allocation alive while registered, so the address
/// cannot be reused by another listener in the meantime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(usize);

impl ListenerId {
    pub fn of(listener: &Arc<dyn EventListener>) -> Self {
        Self(Arc::as_ptr(listener) as *const () as usize)
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Adapts a closure into an `EventListener`.
///
/// # Example
///
/// ```ignore
/// let listener = FnListener::shared("log-notifications", |event| {
///     tracing::info!(topic = %event.topic, "notification changed");
///     Ok(())
/// });
/// bus.subscribe(Topic::NotificationUpdated, listener).await?;
/// ```
pub struct FnListener<F> {
    name: String,
    callback: F,
}

impl<F> FnListener<F>
where
    F: Fn(&EventEnvelope) -> Result<(), DeliveryError> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, callback: F) -> Self {
        Self {
            name: name.into(),
            callback,
        }
    }

    /// Creates the listener already wrapped for registration.
    pub fn shared(name: impl Into<String>, callback: F) -> Arc<dyn EventListener> {
        Arc::new(Self::new(name, callback))
    }
}

impl<F> EventListener for FnListener<F>
where
    F: Fn(&EventEnvelope) -> Result<(), DeliveryError> + Send + Sync + 'static,
{
    fn on_event(&self, event: &EventEnvelope) -> Result<(), DeliveryError> {
        (self.callback)(event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
