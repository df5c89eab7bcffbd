//! Bridge configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```json
//! {
//!   "endpoint": { "kind": "tcp", "host": "127.0.0.1", "port": 47474 },
//!   "poll_interval_ticks": 5,
//!   "chunk_size": 8192
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::manager::RetryPolicy;
use crate::protocol::{DEFAULT_MAX_PAYLOAD_SIZE, MAX_FIELD_VALUE};
use crate::transport::{Endpoint, TransportConfig};
use crate::writer::DEFAULT_CHUNK_SIZE;

/// Default ticks between inbound polls before the controller is ready.
pub const DEFAULT_POLL_INTERVAL_TICKS: u32 = 5;

/// Default ticks between inbound polls once the controller sent `ready`.
pub const DEFAULT_READY_POLL_INTERVAL_TICKS: u32 = 1;

/// Default ticks before retrying a response rejected as busy.
pub const DEFAULT_WRITE_RETRY_TICKS: u32 = 1;

/// Default retries for a response rejected as busy.
pub const DEFAULT_WRITE_RETRY_LIMIT: u32 = 100;

/// Default payload answering the `ready` action.
pub const DEFAULT_READY_REPLY: &str = "SPAGHETTI";

/// Bridge settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Where the controller listens.
    pub endpoint: Endpoint,
    /// Bound on one connect attempt.
    pub connect_timeout_ms: u64,
    /// Bound on a blocking send, and on a stalled chunked response.
    pub write_timeout_ms: u64,
    /// Bound on joining a reader task.
    pub join_timeout_ms: u64,
    /// Bound on stopping the connection manager and the I/O runtime.
    pub shutdown_timeout_ms: u64,
    /// Retry interval for attempts below 51.
    pub retry_fast_ms: u64,
    /// Retry interval for attempts 51 to 499.
    pub retry_slow_ms: u64,
    /// Retry interval from attempt 500.
    pub retry_very_slow_ms: u64,
    /// Bytes written per host tick.
    pub chunk_size: usize,
    /// Largest inbound payload accepted.
    pub max_payload_size: usize,
    /// Ticks between inbound polls.
    pub poll_interval_ticks: u32,
    /// Ticks between inbound polls after `ready`.
    pub ready_poll_interval_ticks: u32,
    /// Ticks before retrying a busy response.
    pub write_retry_ticks: u32,
    /// Busy retries before a response is dropped.
    pub write_retry_limit: u32,
    /// Path reported by the `path` action. Defaults to the executable's
    /// directory.
    pub module_path: Option<PathBuf>,
    /// Payload answering the `ready` action.
    pub ready_reply: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let transport = TransportConfig::default();
        let retry = RetryPolicy::default();

        Self {
            endpoint: Endpoint::default(),
            connect_timeout_ms: millis(transport.connect_timeout),
            write_timeout_ms: millis(transport.write_timeout),
            join_timeout_ms: millis(transport.join_timeout),
            shutdown_timeout_ms: 2_000,
            retry_fast_ms: millis(retry.fast),
            retry_slow_ms: millis(retry.slow),
            retry_very_slow_ms: millis(retry.very_slow),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            poll_interval_ticks: DEFAULT_POLL_INTERVAL_TICKS,
            ready_poll_interval_ticks: DEFAULT_READY_POLL_INTERVAL_TICKS,
            write_retry_ticks: DEFAULT_WRITE_RETRY_TICKS,
            write_retry_limit: DEFAULT_WRITE_RETRY_LIMIT,
            module_path: None,
            ready_reply: DEFAULT_READY_REPLY.to_string(),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl BridgeConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    /// Reject values the bridge cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(BridgeError::Config("chunk_size must be positive".into()));
        }
        if self.poll_interval_ticks == 0 || self.ready_poll_interval_ticks == 0 {
            return Err(BridgeError::Config(
                "poll intervals must be at least one tick".into(),
            ));
        }
        if self.max_payload_size == 0 || self.max_payload_size > MAX_FIELD_VALUE as usize {
            return Err(BridgeError::Config(format!(
                "max_payload_size must be between 1 and {MAX_FIELD_VALUE}"
            )));
        }
        if self.connect_timeout_ms == 0 || self.write_timeout_ms == 0 {
            return Err(BridgeError::Config("timeouts must be positive".into()));
        }
        Ok(())
    }

    /// Transport timeouts and limits.
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            join_timeout: Duration::from_millis(self.join_timeout_ms),
            max_payload_size: self.max_payload_size,
        }
    }

    /// Reconnect intervals.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry_fast_ms),
            Duration::from_millis(self.retry_slow_ms),
            Duration::from_millis(self.retry_very_slow_ms),
        )
    }

    /// Bound on a stalled chunked response.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Bound on shutting the I/O side down.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Path reported by the `path` action.
    pub fn resolved_module_path(&self) -> PathBuf {
        if let Some(path) = &self.module_path {
            return path.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
