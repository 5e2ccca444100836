//! Application layer - orchestrates ports for domain services and the gateway.

mod event_bus;

pub use event_bus::EventBus;
