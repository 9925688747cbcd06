//! Link configuration
//!
//! Settings for the serial link and for the engine thread that drives it.
//! Can be built in code or loaded from a JSON file; missing keys take their
//! defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::protocol::{
    serial, ProtocolError, ProtocolVersion, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS,
};

/// Connection and engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial device path
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Protocol generation of the firmware
    pub protocol: ProtocolVersion,
    /// How long flush and echo wait for their response
    pub flush_timeout_ms: u64,
    /// Sleep between polls while waiting for a response
    pub poll_interval_ms: u64,
    /// How long the engine thread waits for an outgoing request before polling
    pub idle_wait_ms: u64,
    /// Maximum polls per idle cycle
    pub drain_polls: usize,
    /// Send a flush on every idle cycle so the controller's output queue drains
    pub idle_flush: bool,
    /// Override for the post-open settle delay
    pub settle_delay_ms: Option<u64>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            protocol: ProtocolVersion::default(),
            flush_timeout_ms: DEFAULT_TIMEOUT_MS,
            poll_interval_ms: 2,
            idle_wait_ms: 100,
            drain_polls: 32,
            idle_flush: false,
            settle_delay_ms: None,
        }
    }
}

impl LinkConfig {
    /// Default settings for the given port
    pub fn for_port(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON document
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json).map_err(|e| ProtocolError::ConfigError(e.to_string()))
    }

    /// Load a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    /// Serialize as pretty JSON
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string_pretty(self).map_err(|e| ProtocolError::ConfigError(e.to_string()))
    }

    /// Flush and echo timeout
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    /// Sleep between polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Engine wait before an idle cycle
    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    /// Configured settle delay, or the default for this port path
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| serial::settle_delay(&self.port_name))
    }
}
