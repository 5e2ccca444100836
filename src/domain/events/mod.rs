//! Domain event vocabulary: the topic registry, the envelope that carries a
//! payload across the bus, and the bus error taxonomy.

mod envelope;
mod errors;
mod topic;

pub use envelope::EventEnvelope;
pub use errors::{DeliveryError, EventBusError};
pub use topic::Topic;
