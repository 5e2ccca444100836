//! EventBus - the single entry point domain services and the gateway use to
//! publish and subscribe.
//!
//! The backend is chosen once, at construction, from the deployment mode:
//! production uses the Redis Streams transport, everything else the local
//! dispatcher. Callers never see which one they got.
//!
//! ## Lifecycle
//!
//! ```text
//! Created --start()--> Running --shutdown()--> ShutDown
//! ```
//!
//! Every operation other than `start`/`shutdown` requires `Running` and
//! otherwise fails with `NotInitialized`.

use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::adapters::events::{ListenerRegistry, LocalDispatcher, RedisStreamTransport};
use crate::config::{AppConfig, BrokerConfig};
use crate::domain::events::{EventBusError, EventEnvelope, Topic};
use crate::domain::foundation::MonotonicClock;
use crate::ports::{EventListener, EventTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BusState {
    Created,
    Running,
    ShutDown,
}

/// Facade over the configured `EventTransport`.
///
/// # Example
///
/// ```ignore
/// let bus = Arc::new(EventBus::from_config(&config)?);
/// bus.start().await?;
///
/// bus.subscribe(Topic::MessageCreated, listener).await?;
/// bus.emit(Topic::MessageCreated, json!({"id": "m1"})).await;
/// ```
pub struct EventBus {
    transport: Arc<dyn EventTransport>,
    registry: Arc<ListenerRegistry>,
    clock: MonotonicClock,
    state: RwLock<BusState>,
    lifecycle: Mutex<()>,
}

impl EventBus {
    /// Wrap an already-built transport that dispatches through `registry`.
    pub fn new(transport: Arc<dyn EventTransport>, registry: Arc<ListenerRegistry>) -> Self {
        Self {
            transport,
            registry,
            clock: MonotonicClock::new(),
            state: RwLock::new(BusState::Created),
            lifecycle: Mutex::new(()),
        }
    }

    /// In-process bus for single-instance deployments and tests.
    pub fn local() -> Self {
        let registry = Arc::new(ListenerRegistry::new());
        let transport = Arc::new(LocalDispatcher::new(Arc::clone(&registry)));
        Self::new(transport, registry)
    }

    /// Broker-backed bus.
    pub fn redis(config: BrokerConfig) -> Result<Self, EventBusError> {
        let registry = Arc::new(ListenerRegistry::new());
        let transport = Arc::new(RedisStreamTransport::new(config, Arc::clone(&registry))?);
        Ok(Self::new(transport, registry))
    }

    /// Picks the backend from the deployment mode.
    pub fn from_config(config: &AppConfig) -> Result<Self, EventBusError> {
        if config.is_production() {
            Self::redis(config.broker.clone())
        } else {
            Ok(Self::local())
        }
    }

    /// Connect the backend. Idempotent while running; fails after shutdown.
    pub async fn start(&self) -> Result<(), EventBusError> {
        let _lifecycle = self.lifecycle.lock().await;
        match self.state() {
            BusState::Running => return Ok(()),
            BusState::ShutDown => return Err(EventBusError::NotInitialized),
            BusState::Created => {}
        }

        self.transport.start().await?;
        *self.state.write() = BusState::Running;
        tracing::info!(backend = self.transport.name(), "Event bus started");
        Ok(())
    }

    /// Stop the backend and drop every listener. Idempotent.
    pub async fn shutdown(&self) -> Result<(), EventBusError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state() == BusState::ShutDown {
            return Ok(());
        }

        *self.state.write() = BusState::ShutDown;
        self.transport.shutdown().await?;
        tracing::info!(backend = self.transport.name(), "Event bus shut down");
        Ok(())
    }

    /// Publish `data` on `topic`, stamped with the bus clock.
    ///
    /// Failures are logged and returned.
    pub async fn publish(&self, topic: Topic, data: JsonValue) -> Result<(), EventBusError> {
        self.ensure_running()?;
        let envelope = EventEnvelope::new(topic, data, self.clock.now());

        self.transport.publish(envelope).await.map_err(|e| {
            tracing::error!(topic = %topic, error = %e, "Failed to publish event");
            e
        })
    }

    /// Fire-and-forget publish for domain services.
    ///
    /// Real-time delivery is best-effort: a failure is logged by `publish`
    /// and never propagates into the caller's mutation.
    pub async fn emit(&self, topic: Topic, data: JsonValue) {
        if let Err(EventBusError::NotInitialized) = self.publish(topic, data).await {
            tracing::warn!(topic = %topic, "Event dropped: bus not running");
        }
    }

    pub async fn subscribe(
        &self,
        topic: Topic,
        listener: Arc<dyn EventListener>,
    ) -> Result<(), EventBusError> {
        self.ensure_running()?;
        self.transport.subscribe(topic, listener).await
    }

    /// Returns `false` if the listener was not subscribed to `topic`.
    pub async fn unsubscribe(
        &self,
        topic: Topic,
        listener: &Arc<dyn EventListener>,
    ) -> Result<bool, EventBusError> {
        self.ensure_running()?;
        self.transport.unsubscribe(topic, listener).await
    }

    pub fn listener_count(&self, topic: Topic) -> usize {
        self.registry.listener_count(topic)
    }

    pub fn total_listeners(&self) -> usize {
        self.registry.total_listeners()
    }

    pub fn backend_name(&self) -> &'static str {
        self.transport.name()
    }

    pub fn is_running(&self) -> bool {
        self.state() == BusState::Running
    }

    fn state(&self) -> BusState {
        *self.state.read()
    }

    fn ensure_running(&self) -> Result<(), EventBusError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(EventBusError::NotInitialized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::DeliveryError;
    use crate::ports::FnListener;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(name: &str) -> (Arc<dyn EventListener>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let listener = FnListener::shared(name, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (listener, count)
    }

    /// Transport whose publish always fails.
    struct BrokenTransport;

    #[async_trait]
    impl EventTransport for BrokenTransport {
        fn name(&self) -> &'static str {
            "broken"
        }
        async fn start(&self) -> Result<(), EventBusError> {
            Ok(())
        }
        async fn publish(&self, event: EventEnvelope) -> Result<(), EventBusError> {
            Err(EventBusError::publish_failed(event.topic.as_str(), "broker down"))
        }
        async fn subscribe(
            &self,
            _: Topic,
            _: Arc<dyn EventListener>,
        ) -> Result<(), EventBusError> {
            Ok(())
        }
        async fn unsubscribe(
            &self,
            _: Topic,
            _: &Arc<dyn EventListener>,
        ) -> Result<bool, EventBusError> {
            Ok(false)
        }
        async fn shutdown(&self) -> Result<(), EventBusError> {
            Ok(())
        }
    }

    /// Transport that cannot reach its backend.
    struct UnreachableTransport;

    #[async_trait]
    impl EventTransport for UnreachableTransport {
        fn name(&self) -> &'static str {
            "unreachable"
        }
        async fn start(&self) -> Result<(), EventBusError> {
            Err(EventBusError::subscribe_failed("connection refused"))
        }
        async fn publish(&self, _: EventEnvelope) -> Result<(), EventBusError> {
            Ok(())
        }
        async fn subscribe(
            &self,
            _: Topic,
            _: Arc<dyn EventListener>,
        ) -> Result<(), EventBusError> {
            Ok(())
        }
        async fn unsubscribe(
            &self,
            _: Topic,
            _: &Arc<dyn EventListener>,
        ) -> Result<bool, EventBusError> {
            Ok(false)
        }
        async fn shutdown(&self) -> Result<(), EventBusError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn operations_before_start_are_not_initialized() {
        let bus = EventBus::local();
        let (listener, _) = counting("l");

        assert_eq!(
            bus.publish(Topic::PostUpdated, json!({})).await,
            Err(EventBusError::NotInitialized)
        );
        assert_eq!(
            bus.subscribe(Topic::PostUpdated, Arc::clone(&listener)).await,
            Err(EventBusError::NotInitialized)
        );
        assert_eq!(
            bus.unsubscribe(Topic::PostUpdated, &listener).await,
            Err(EventBusError::NotInitialized)
        );
    }

    #[tokio::test]
    async fn operations_after_shutdown_are_not_initialized() {
        let bus = EventBus::local();
        bus.start().await.unwrap();
        bus.shutdown().await.unwrap();

        assert!(!bus.is_running());
        assert_eq!(
            bus.publish(Topic::PostUpdated, json!({})).await,
            Err(EventBusError::NotInitialized)
        );
        assert_eq!(bus.start().await, Err(EventBusError::NotInitialized));
    }

    #[tokio::test]
    async fn start_and_shutdown_are_idempotent() {
        let bus = EventBus::local();
        bus.start().await.unwrap();
        bus.start().await.unwrap();
        assert!(bus.is_running());

        bus.shutdown().await.unwrap();
        bus.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_drops_listeners() {
        let bus = EventBus::local();
        bus.start().await.unwrap();
        let (listener, _) = counting("l");
        bus.subscribe(Topic::ExamUpdated, listener).await.unwrap();
        assert_eq!(bus.listener_count(Topic::ExamUpdated), 1);

        bus.shutdown().await.unwrap();
        assert_eq!(bus.total_listeners(), 0);
    }

    #[tokio::test]
    async fn failed_start_leaves_bus_uninitialized() {
        let bus = EventBus::new(
            Arc::new(UnreachableTransport),
            Arc::new(ListenerRegistry::new()),
        );

        assert!(matches!(
            bus.start().await,
            Err(EventBusError::SubscribeFailed(_))
        ));
        assert!(!bus.is_running());
    }

    #[tokio::test]
    async fn publish_surfaces_transport_failure() {
        let bus = EventBus::new(Arc::new(BrokenTransport), Arc::new(ListenerRegistry::new()));
        bus.start().await.unwrap();

        assert!(matches!(
            bus.publish(Topic::PostUpdated, json!({})).await,
            Err(EventBusError::PublishFailed { .. })
        ));
        // emit swallows the same failure
        bus.emit(Topic::PostUpdated, json!({})).await;
    }

    #[tokio::test]
    async fn publish_stamps_non_decreasing_timestamps() {
        let bus = EventBus::local();
        bus.start().await.unwrap();

        let stamps = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&stamps);
        let listener = FnListener::shared("stamps", move |event: &EventEnvelope| {
            sink.lock().push(event.timestamp);
            Ok(())
        });
        bus.subscribe(Topic::ScheduleUpdated, listener).await.unwrap();

        for i in 0..50 {
            bus.publish(Topic::ScheduleUpdated, json!({ "i": i }))
                .await
                .unwrap();
        }

        let stamps = stamps.lock();
        assert_eq!(stamps.len(), 50);
        assert!(stamps.windows(2).all(|w| !w[1].is_before(&w[0])));
    }

    #[tokio::test]
    async fn failing_listener_does_not_block_others() {
        let bus = EventBus::local();
        bus.start().await.unwrap();
        let failing = FnListener::shared("failing", |_| Err(DeliveryError::QueueFull));
        let (healthy, count) = counting("healthy");

        bus.subscribe(Topic::MessageDeleted, failing).await.unwrap();
        bus.subscribe(Topic::MessageDeleted, healthy).await.unwrap();
        bus.publish(Topic::MessageDeleted, json!({"id": "m1"}))
            .await
            .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backend_follows_deployment_mode() {
        let mut config = AppConfig::default();
        assert_eq!(EventBus::from_config(&config).unwrap().backend_name(), "local");

        config.server.environment = crate::config::Environment::Production;
        config.broker = BrokerConfig::with_url("redis://127.0.0.1:6379");
        assert_eq!(
            EventBus::from_config(&config).unwrap().backend_name(),
            "redis-streams"
        );
    }
}
