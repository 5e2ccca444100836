//! Event envelope and its broker wire format.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::domain::foundation::Timestamp;

use super::{EventBusError, Topic};

/// A published event as seen by listeners.
///
/// `data` is opaque to the bus and shared behind an `Arc` so fan-out to many
/// connections does not copy the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub topic: Topic,
    pub data: Arc<JsonValue>,
    pub timestamp: Timestamp,
}

impl EventEnvelope {
    pub fn new(topic: Topic, data: JsonValue, timestamp: Timestamp) -> Self {
        Self {
            topic,
            data: Arc::new(data),
            timestamp,
        }
    }

    /// Encodes the envelope as the UTF-8 JSON message value sent to the broker.
    pub fn to_wire(&self) -> Result<String, EventBusError> {
        let wire = WireEventRef {
            event_type: self.topic.as_str(),
            data: &self.data,
            timestamp: self.timestamp.as_epoch_millis(),
        };
        serde_json::to_string(&wire)
            .map_err(|e| EventBusError::publish_failed(self.topic.as_str(), e.to_string()))
    }

    /// Decodes a broker message value.
    ///
    /// Fails with `DecodeFailed` on malformed JSON, an `eventType` outside
    /// the registry, or an unrepresentable timestamp.
    pub fn from_wire(raw: &str) -> Result<Self, EventBusError> {
        let wire: WireEvent =
            serde_json::from_str(raw).map_err(|e| EventBusError::decode_failed(e.to_string()))?;

        let topic: Topic = wire
            .event_type
            .parse()
            .map_err(|e: EventBusError| EventBusError::decode_failed(e.to_string()))?;

        let timestamp = Timestamp::from_epoch_millis(wire.timestamp).ok_or_else(|| {
            EventBusError::decode_failed(format!("timestamp out of range: {}", wire.timestamp))
        })?;

        Ok(Self {
            topic,
            data: Arc::new(wire.data),
            timestamp,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEventRef<'a> {
    event_type: &'a str,
    data: &'a JsonValue,
    timestamp: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    event_type: String,
    #[serde(default)]
    data: JsonValue,
    timestamp: i64,
}
