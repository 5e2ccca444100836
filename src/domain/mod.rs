//! Domain layer - event vocabulary and shared value objects.

pub mod events;
pub mod foundation;
