//! Event transport adapters.
//!
//! Both transports share a `ListenerRegistry` injected at construction:
//!
//! - `LocalDispatcher` - Synchronous, in-process dispatch for single instances
//! - `RedisStreamTransport` - Redis Streams consumer group for production

mod local;
mod redis_streams;
mod registry;

pub use local::LocalDispatcher;
pub use redis_streams::RedisStreamTransport;
pub use registry::{DispatchReport, ListenerRegistry};
