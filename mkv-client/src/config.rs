//! Client configuration.
//!
//! Timeouts are stored as milliseconds so the struct round-trips through
//! JSON unchanged; accessors convert them to `Duration`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Configuration for the pool and its TCP connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Number of pooled connections; the only concurrency limit.
    pub pool_size: usize,
    /// How long a borrow may wait for a free connection. `None` waits forever.
    pub acquire_timeout_ms: Option<u64>,
    /// Optional TCP connect timeout.
    pub connect_timeout_ms: Option<u64>,
    /// Optional TCP read timeout; bounds how long a command waits for its reply.
    pub read_timeout_ms: Option<u64>,
    /// Optional TCP write timeout.
    pub write_timeout_ms: Option<u64>,
    /// Immediate reconnect retries on borrow before the borrow fails.
    pub reconnect_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:6379".to_string(),
            pool_size: 8,
            acquire_timeout_ms: None,
            connect_timeout_ms: Some(5_000),
            read_timeout_ms: None,
            write_timeout_ms: None,
            reconnect_attempts: 2,
        }
    }
}

impl ClientConfig {
    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json(input: &str) -> ClientResult<Self> {
        let config: ClientConfig = serde_json::from_str(input)
            .map_err(|_| ClientError::InvalidConfig("malformed client configuration"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.pool_size == 0 {
            return Err(ClientError::InvalidConfig("pool_size must be at least 1"));
        }
        if self.addr.trim().is_empty() {
            return Err(ClientError::InvalidConfig("addr must not be empty"));
        }
        Ok(())
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }
}
