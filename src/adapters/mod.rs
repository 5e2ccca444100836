//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the domain to external systems:
//! - `auth` - Session credential validation (JWT, mock)
//! - `events` - Event transports (local dispatcher, Redis Streams)
//! - `websocket` - Connection gateway for browser clients

pub mod auth;
pub mod events;
pub mod websocket;

pub use auth::{JwtSessionValidator, MockSessionValidator};
pub use events::{ListenerRegistry, LocalDispatcher, RedisStreamTransport};
pub use websocket::{events_router, ConnectionGateway};
