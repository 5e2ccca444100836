//! Redis Streams transport - durable, multi-instance event delivery.
//!
//! Each topic is a stream named after the topic string. Envelopes are
//! appended with `XADD` (field `value`, the JSON wire form) and consumed with
//! `XREADGROUP` by one consumer per process inside a shared consumer group.
//!
//! ## Startup
//!
//! `start` connects a producer, connects a dedicated consumer connection,
//! then creates the consumer group on **every** topic stream (`MKSTREAM`,
//! starting at the tail) before the receive loop is spawned. A topic's group
//! therefore exists before any of its messages can be read.
//!
//! ## Delivery
//!
//! For each inbound entry the receive loop decodes the envelope, dispatches
//! it to the locally registered listeners, then acknowledges it. Entries that
//! cannot be decoded are logged and acknowledged so they are never
//! redelivered.
//!
//! ## Failure handling
//!
//! Publishing is bounded by a per-attempt timeout with exponential backoff
//! between attempts. An attempt that fails on the connection rather than
//! with an error reply reopens the producer before retrying. A failed read
//! drops the consumer connection, waits, and reconnects (re-creating any
//! missing groups). The loop stops when the shutdown signal fires.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisError};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::BrokerConfig;
use crate::domain::events::{EventBusError, EventEnvelope, Topic};
use crate::ports::{EventListener, EventTransport};

use super::registry::ListenerRegistry;

/// Stream entry field holding the encoded envelope.
const VALUE_FIELD: &str = "value";

/// Broker-backed transport using Redis Streams consumer groups.
pub struct RedisStreamTransport {
    client: redis::Client,
    config: BrokerConfig,
    consumer_name: String,
    registry: Arc<ListenerRegistry>,
    producer: Mutex<Option<MultiplexedConnection>>,
    consumer_task: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl RedisStreamTransport {
    /// Create a transport for the configured Redis URL.
    ///
    /// No connection is made until `start`.
    pub fn new(
        config: BrokerConfig,
        registry: Arc<ListenerRegistry>,
    ) -> Result<Self, EventBusError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| EventBusError::subscribe_failed(format!("invalid broker url: {}", e)))?;
        let consumer_name = config.resolved_consumer_name();
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            client,
            config,
            consumer_name,
            registry,
            producer: Mutex::new(None),
            consumer_task: Mutex::new(None),
            shutdown_tx,
        })
    }

    /// Consumer name this process reads as inside the group.
    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    fn producer(&self) -> Option<MultiplexedConnection> {
        self.producer.lock().clone()
    }

    async fn append(
        conn: &mut MultiplexedConnection,
        config: &BrokerConfig,
        topic: Topic,
        payload: &str,
    ) -> Result<String, AppendError> {
        let fields = [(VALUE_FIELD, payload)];
        let append = conn.xadd_maxlen::<_, _, _, _, String>(
            topic.as_str(),
            StreamMaxlen::Approx(config.stream_max_len),
            "*",
            &fields,
        );

        match time::timeout(config.publish_timeout(), append).await {
            Ok(Ok(id)) => Ok(id),
            Ok(Err(e)) => Err(AppendError::Broker(e)),
            Err(_) => Err(AppendError::TimedOut(config.publish_timeout_ms)),
        }
    }

    /// Replaces a broken producer connection.
    ///
    /// The fresh connection is only stored while the transport is running,
    /// so a concurrent `shutdown` is never undone.
    async fn reconnect_producer(&self) -> Option<MultiplexedConnection> {
        match connect(&self.client).await {
            Ok(fresh) => {
                let mut producer = self.producer.lock();
                if producer.is_none() {
                    return None;
                }
                *producer = Some(fresh.clone());
                tracing::info!("Reconnected stream producer");
                Some(fresh)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Producer reconnect failed");
                None
            }
        }
    }
}

/// Why one `XADD` attempt failed.
#[derive(Debug)]
enum AppendError {
    Broker(RedisError),
    TimedOut(u64),
}

impl AppendError {
    /// An error reply means the connection itself is fine; anything else
    /// (I/O failure, dropped connection, timeout) calls for a new one.
    fn needs_reconnect(&self) -> bool {
        match self {
            AppendError::Broker(e) => e.code().is_none(),
            AppendError::TimedOut(_) => true,
        }
    }
}

impl std::fmt::Display for AppendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppendError::Broker(e) => write!(f, "{}", e),
            AppendError::TimedOut(ms) => write!(f, "timed out after {}ms", ms),
        }
    }
}

#[async_trait]
impl EventTransport for RedisStreamTransport {
    fn name(&self) -> &'static str {
        "redis-streams"
    }

    async fn start(&self) -> Result<(), EventBusError> {
        if self.producer().is_some() {
            return Ok(());
        }

        let mut producer = connect(&self.client).await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut producer)
            .await
            .map_err(|e| EventBusError::subscribe_failed(e.to_string()))?;

        let mut consumer_conn = connect(&self.client).await?;
        ensure_groups(&mut consumer_conn, &self.config.consumer_group).await?;

        let consumer = StreamConsumer {
            client: self.client.clone(),
            registry: Arc::clone(&self.registry),
            config: self.config.clone(),
            consumer_name: self.consumer_name.clone(),
        };
        let handle = tokio::spawn(consumer.run(consumer_conn, self.shutdown_tx.subscribe()));

        *self.producer.lock() = Some(producer);
        *self.consumer_task.lock() = Some(handle);

        tracing::info!(
            group = %self.config.consumer_group,
            consumer = %self.consumer_name,
            topics = Topic::ALL.len(),
            "Redis Streams transport started"
        );
        Ok(())
    }

    async fn publish(&self, event: EventEnvelope) -> Result<(), EventBusError> {
        let mut conn = self.producer().ok_or(EventBusError::NotInitialized)?;
        let payload = event.to_wire()?;
        let max_attempts = self.config.publish_max_retries + 1;
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            match Self::append(&mut conn, &self.config, event.topic, &payload).await {
                Ok(id) => {
                    tracing::trace!(topic = %event.topic, id = %id, "Appended event to stream");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        topic = %event.topic,
                        attempt = attempt + 1,
                        max_attempts,
                        error = %e,
                        "Publish attempt failed"
                    );
                    last_error = e.to_string();
                    if attempt + 1 == max_attempts {
                        break;
                    }

                    time::sleep(self.config.backoff(attempt)).await;
                    if e.needs_reconnect() {
                        match self.reconnect_producer().await {
                            Some(fresh) => conn = fresh,
                            None if self.producer().is_none() => {
                                return Err(EventBusError::NotInitialized)
                            }
                            None => {}
                        }
                    }
                }
            }
        }

        Err(EventBusError::publish_failed(event.topic.as_str(), last_error))
    }

    async fn subscribe(
        &self,
        topic: Topic,
        listener: Arc<dyn EventListener>,
    ) -> Result<(), EventBusError> {
        // The consumer group already covers every topic; interest is local.
        if !self.registry.insert(topic, listener) {
            tracing::debug!(topic = %topic, "Listener already subscribed");
        }
        Ok(())
    }

    async fn unsubscribe(
        &self,
        topic: Topic,
        listener: &Arc<dyn EventListener>,
    ) -> Result<bool, EventBusError> {
        Ok(self.registry.remove(topic, listener))
    }

    async fn shutdown(&self) -> Result<(), EventBusError> {
        self.shutdown_tx.send_replace(true);

        let handle = self.consumer_task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Stream consumer task panicked");
            }
        }

        self.producer.lock().take();
        self.registry.clear();
        tracing::info!("Redis Streams transport stopped");
        Ok(())
    }
}

async fn connect(client: &redis::Client) -> Result<MultiplexedConnection, EventBusError> {
    client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| EventBusError::subscribe_failed(format!("broker unreachable: {}", e)))
}

/// Creates the consumer group on every topic stream, starting at the tail.
/// An existing group is left where it is.
async fn ensure_groups(
    conn: &mut MultiplexedConnection,
    group: &str,
) -> Result<(), EventBusError> {
    for topic in Topic::all() {
        let created: Result<(), RedisError> = conn
            .xgroup_create_mkstream(topic.as_str(), group, "$")
            .await;
        match created {
            Ok(()) => tracing::debug!(topic = %topic, group, "Created consumer group"),
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => {
                return Err(EventBusError::subscribe_failed(format!(
                    "cannot create group on '{}': {}",
                    topic, e
                )))
            }
        }
    }
    Ok(())
}

/// Decodes one stream entry read from `topic`'s stream.
fn decode_entry(topic: Topic, entry: &StreamId) -> Result<EventEnvelope, EventBusError> {
    let raw: String = entry
        .get(VALUE_FIELD)
        .ok_or_else(|| EventBusError::decode_failed(format!("entry has no '{}' field", VALUE_FIELD)))?;
    let envelope = EventEnvelope::from_wire(&raw)?;
    if envelope.topic != topic {
        return Err(EventBusError::decode_failed(format!(
            "eventType '{}' read from stream '{}'",
            envelope.topic, topic
        )));
    }
    Ok(envelope)
}

/// Receive loop state, owned by the spawned consumer task.
struct StreamConsumer {
    client: redis::Client,
    registry: Arc<ListenerRegistry>,
    config: BrokerConfig,
    consumer_name: String,
}

impl StreamConsumer {
    async fn run(self, mut conn: MultiplexedConnection, mut shutdown: watch::Receiver<bool>) {
        let keys: Vec<&'static str> = Topic::all().map(|t| t.as_str()).collect();
        let ids = vec![">"; keys.len()];
        let options = StreamReadOptions::default()
            .group(&self.config.consumer_group, &self.consumer_name)
            .block(self.config.read_block().as_millis() as usize)
            .count(self.config.read_batch_size);
        let mut failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let read = tokio::select! {
                _ = shutdown.changed() => break,
                read = conn.xread_options::<_, _, Option<StreamReadReply>>(&keys[..], &ids[..], &options) => read,
            };

            match read {
                Ok(Some(reply)) => {
                    failures = 0;
                    self.handle_reply(&mut conn, reply).await;
                }
                Ok(None) => failures = 0,
                Err(e) => {
                    let delay = self.config.backoff(failures);
                    failures = failures.saturating_add(1);
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Stream read failed, reconnecting"
                    );

                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = time::sleep(delay) => {}
                    }

                    match self.reconnect().await {
                        Ok(fresh) => conn = fresh,
                        Err(e) => tracing::warn!(error = %e, "Broker reconnect failed"),
                    }
                }
            }
        }

        tracing::debug!(consumer = %self.consumer_name, "Stream consumer stopped");
    }

    async fn reconnect(&self) -> Result<MultiplexedConnection, EventBusError> {
        let mut conn = connect(&self.client).await?;
        // A flushed or restarted broker loses its groups.
        ensure_groups(&mut conn, &self.config.consumer_group).await?;
        Ok(conn)
    }

    async fn handle_reply(&self, conn: &mut MultiplexedConnection, reply: StreamReadReply) {
        for stream in reply.keys {
            let topic: Option<Topic> = stream.key.parse().ok();
            let mut processed = Vec::with_capacity(stream.ids.len());

            for entry in &stream.ids {
                let decoded = match topic {
                    Some(topic) => decode_entry(topic, entry),
                    None => Err(EventBusError::UnknownTopic(stream.key.clone())),
                };
                match decoded {
                    Ok(envelope) => {
                        let report = self.registry.dispatch(&envelope);
                        tracing::trace!(
                            topic = %envelope.topic,
                            id = %entry.id,
                            delivered = report.delivered,
                            failed = report.failed,
                            "Dispatched stream entry"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            stream = %stream.key,
                            id = %entry.id,
                            error = %e,
                            "Dropping undecodable stream entry"
                        );
                    }
                }
                processed.push(entry.id.as_str());
            }

            if processed.is_empty() {
                continue;
            }
            let acked: Result<i64, RedisError> = conn
                .xack(stream.key.as_str(), &self.config.consumer_group, &processed[..])
                .await;
            if let Err(e) = acked {
                tracing::warn!(stream = %stream.key, error = %e, "Failed to acknowledge entries");
            }
        }
    }
}
