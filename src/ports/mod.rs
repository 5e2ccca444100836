//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the event bus, the gateway and the outside world. Adapters implement them.
//!
//! - `EventListener` - Callback invoked for each event on a subscribed topic
//! - `EventTransport` - Backend strategy behind the event bus facade
//! - `SessionValidator` - Validates handshake credentials

mod event_listener;
mod event_transport;
mod session_validator;

pub use event_listener::{EventListener, FnListener, ListenerId};
pub use event_transport::EventTransport;
pub use session_validator::SessionValidator;
