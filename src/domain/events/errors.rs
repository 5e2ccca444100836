//! Error taxonomy for the event bus.

use thiserror::Error;

/// Errors surfaced by the event bus facade and its transports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventBusError {
    /// The transport was reachable but rejected the send or timed out.
    #[error("Publish to '{topic}' failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    /// The backend could not be reached to register interest.
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    /// The bus was used before `start` completed, or after `shutdown`.
    #[error("Event bus is not initialized")]
    NotInitialized,

    /// An inbound broker message could not be decoded.
    #[error("Failed to decode event: {0}")]
    DecodeFailed(String),

    /// A topic name outside the registry.
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),
}

impl EventBusError {
    pub fn publish_failed(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PublishFailed {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    pub fn subscribe_failed(reason: impl Into<String>) -> Self {
        Self::SubscribeFailed(reason.into())
    }

    pub fn decode_failed(reason: impl Into<String>) -> Self {
        Self::DecodeFailed(reason.into())
    }
}

/// Failure of a single listener to accept an event.
///
/// Delivery failures are isolated per listener: the dispatcher logs them and
/// continues with the remaining listeners.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The listener's connection has been closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The listener's bounded queue is full; the event was dropped.
    #[error("Outbound queue full")]
    QueueFull,

    /// Any other listener-specific failure.
    #[error("{0}")]
    Rejected(String),
}
