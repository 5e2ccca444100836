//! Foundation module - Shared domain primitives.
//!
//! Contains value objects, identifiers and error types shared by the
//! event bus and the connection gateway.

mod auth;
mod errors;
mod ids;
mod timestamp;

pub use auth::{AuthError, AuthenticatedUser};
pub use errors::ValidationError;
pub use ids::{ConnectionId, RoomId, UserId, MAX_ROOM_ID_LEN};
pub use timestamp::{MonotonicClock, Timestamp};
