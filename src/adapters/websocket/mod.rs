//! WebSocket gateway for real-time event delivery.
//!
//! Pushes every bus topic to authenticated frontend clients. Each live
//! socket is one [`Connection`] holding one listener per topic; the
//! connection's room interest set decides, through a [`RoomFilter`],
//! which events actually reach the client.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           EventBus                                   │
//! │        LocalDispatcher (dev/test) │ RedisStreamTransport (prod)     │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                     │
//!                                     │ one listener per topic per connection
//!                                     ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         Connection                                   │
//! │   - RoomFilter decides delivery                                      │
//! │   - EventEnvelope → ServerFrame { event: topic, data }               │
//! │   - bounded outbound queue, drained by the socket writer             │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                     │
//!                                     ▼
//!                             WebSocket client
//! ```
//!
//! # Components
//!
//! - [`messages`] - WebSocket message protocol types
//! - [`rooms`] - Room groups for targeted broadcast
//! - [`filter`] - Room-scoped delivery policy
//! - [`connection`] - Per-socket registrations and teardown
//! - [`gateway`] - Authentication, connection tracking, commands
//! - [`handler`] - Axum WebSocket upgrade handler

pub mod connection;
pub mod error;
pub mod filter;
pub mod gateway;
pub mod handler;
pub mod messages;
pub mod rooms;

pub use connection::{Connection, ConnectionState};
pub use error::GatewayError;
pub use filter::{AcceptAll, RoomFilter};
pub use gateway::{ConnectionGateway, ConnectionSession};
pub use handler::{events_router, SocketUser};
pub use messages::{ClientMessage, ErrorCode, ServerFrame};
pub use rooms::RoomManager;
