//! Broker configuration (Redis Streams)

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Consumer name used when neither the config nor `HOSTNAME` provides one.
const DEFAULT_CONSUMER_NAME: &str = "classroom-events";

/// Durable broker configuration.
///
/// Each topic is a Redis stream of the same name. All instances share one
/// consumer group; each instance reads as its own consumer within it.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Redis connection URL. Empty means no broker (local dispatch).
    #[serde(default)]
    pub url: String,

    /// Consumer group shared by all instances
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Consumer name within the group (defaults to the host name)
    pub consumer_name: Option<String>,

    /// How long one XREADGROUP call blocks waiting for messages
    #[serde(default = "default_read_block_ms")]
    pub read_block_ms: u64,

    /// Maximum messages fetched per stream per read
    #[serde(default = "default_read_batch_size")]
    pub read_batch_size: usize,

    /// Per-attempt publish timeout
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    /// Retries after the first failed publish attempt
    #[serde(default = "default_publish_max_retries")]
    pub publish_max_retries: u32,

    /// First retry / reconnect delay
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound on retry / reconnect delay
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Approximate cap on each stream's length (MAXLEN ~)
    #[serde(default = "default_stream_max_len")]
    pub stream_max_len: usize,
}

impl BrokerConfig {
    /// Broker settings pointing at a Redis URL, everything else defaulted.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Whether a broker URL is configured at all.
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty()
    }

    pub fn read_block(&self) -> Duration {
        Duration::from_millis(self.read_block_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    /// Exponential backoff for the given zero-based attempt, capped at
    /// `backoff_max_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(20)).unwrap_or(u64::MAX);
        let millis = self.backoff_base_ms.saturating_mul(factor);
        Duration::from_millis(millis.min(self.backoff_max_ms))
    }

    /// Consumer name for this process.
    ///
    /// Defaults to the host name so a restarted instance rejoins the group
    /// as the same consumer instead of leaving an orphan behind.
    pub fn resolved_consumer_name(&self) -> String {
        if let Some(name) = self.consumer_name.as_ref().filter(|n| !n.trim().is_empty()) {
            return name.clone();
        }
        std::env::var("HOSTNAME")
            .ok()
            .map(|host| host.trim().to_string())
            .filter(|host| !host.is_empty())
            .unwrap_or_else(|| DEFAULT_CONSUMER_NAME.to_string())
    }

    /// Validate broker configuration
    ///
    /// An empty URL is valid here; whether a broker is required depends on
    /// the environment and is checked by `AppConfig::validate`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.is_configured()
            && !self.url.starts_with("redis://")
            && !self.url.starts_with("rediss://")
        {
            return Err(ValidationError::InvalidBrokerUrl);
        }
        if self.consumer_group.trim().is_empty() {
            return Err(ValidationError::MissingRequired("BROKER__CONSUMER_GROUP"));
        }
        if self.read_batch_size == 0 {
            return Err(ValidationError::InvalidBatchSize);
        }
        if self.publish_timeout_ms == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(ValidationError::InvalidBackoff);
        }
        Ok(())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            consumer_group: default_consumer_group(),
            consumer_name: None,
            read_block_ms: default_read_block_ms(),
            read_batch_size: default_read_batch_size(),
            publish_timeout_ms: default_publish_timeout_ms(),
            publish_max_retries: default_publish_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            stream_max_len: default_stream_max_len(),
        }
    }
}

fn default_consumer_group() -> String {
    "pubsub-group".to_string()
}

fn default_read_block_ms() -> u64 {
    5_000
}

fn default_read_batch_size() -> usize {
    64
}

fn default_publish_timeout_ms() -> u64 {
    2_000
}

fn default_publish_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    5_000
}

fn default_stream_max_len() -> usize {
    10_000
}
