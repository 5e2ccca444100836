//! WebSocket gateway configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Per-connection settings for the WebSocket gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Interval between server pings
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Silence after which a connection is considered dead
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,

    /// Frames buffered per connection before new ones are dropped
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

impl GatewayConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    /// Validate gateway configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.ping_interval_secs == 0 || self.ping_timeout_secs <= self.ping_interval_secs {
            return Err(ValidationError::InvalidKeepalive);
        }
        if self.outbound_capacity == 0 {
            return Err(ValidationError::InvalidBatchSize);
        }
        Ok(())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            ping_timeout_secs: default_ping_timeout(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

fn default_ping_interval() -> u64 {
    10
}

fn default_ping_timeout() -> u64 {
    20
}

fn default_outbound_capacity() -> usize {
    256
}
