//! Classroom Events - real-time domain event distribution.
//!
//! A topic-based publish/subscribe bus with a local in-process backend and
//! a Redis Streams backend, plus a WebSocket gateway that forwards events
//! to authenticated browser clients.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
