//! Multiplexer configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use sm_stream::{StreamOptions, DEFAULT_DRAIN_TIMEOUT, DEFAULT_LIMIT, DEFAULT_READ_CHUNK};

use super::serde_utils::duration_secs;
use crate::error::ConfigError;

/// Default per-session catch-up buffer (1 MiB)
pub const DEFAULT_PENDING_OUTPUT_CAP: usize = 1024 * 1024;

/// Default number of forwarded lines remembered per session
pub const DEFAULT_HISTORY_LEN: usize = 256;

/// Configuration for the multiplexer and its listeners
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    /// Bytes retained per inactive session; oldest are dropped past this
    pub pending_output_cap: usize,

    /// Forwarded operator lines remembered per session
    pub history_len: usize,

    /// Buffered stream parameters for session sockets
    pub stream: StreamConfig,

    /// Logging
    pub log: LogConfig,

    /// Upgrade every new session to a PTY on connect
    pub auto_upgrade: Option<PtyUpgradeConfig>,

    /// Listeners created at startup
    pub listeners: Vec<ListenerConfig>,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            pending_output_cap: DEFAULT_PENDING_OUTPUT_CAP,
            history_len: DEFAULT_HISTORY_LEN,
            stream: StreamConfig::default(),
            log: LogConfig::default(),
            auto_upgrade: None,
            listeners: vec![ListenerConfig::default()],
        }
    }
}

impl MuxConfig {
    /// Reject values the multiplexer cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stream.to_options().validate()?;
        if self.pending_output_cap == 0 {
            return Err(ConfigError::Invalid(
                "pending_output_cap must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }
}

/// Buffered stream parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Buffer limit in bytes
    pub limit: usize,

    /// Bytes read per inbound relay step
    pub read_chunk: usize,

    /// Seconds a closing session may take to drain
    #[serde(with = "duration_secs")]
    pub drain_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            read_chunk: DEFAULT_READ_CHUNK,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl StreamConfig {
    /// Options for a session socket. Writes are bounded by the drain timeout
    /// so a stalled peer cannot hold up the operator.
    pub fn to_options(&self) -> StreamOptions {
        StreamOptions {
            limit: self.limit,
            read_chunk: self.read_chunk,
            drain_timeout: self.drain_timeout,
            write_timeout: Some(self.drain_timeout),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,

    /// Log file; stderr when unset
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// A listener to create at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,

    /// Start accepting immediately
    #[serde(default = "default_autostart")]
    pub autostart: bool,
}

fn default_autostart() -> bool {
    true
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8888,
            autostart: true,
        }
    }
}

/// Commands used to turn a raw shell into a PTY
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PtyUpgradeConfig {
    /// `python`, `python3` or `script`
    pub binary: String,

    /// Shell to spawn inside the PTY
    pub shell: String,
}

impl Default for PtyUpgradeConfig {
    fn default() -> Self {
        Self {
            binary: "python3".to_string(),
            shell: "/bin/bash".to_string(),
        }
    }
}
