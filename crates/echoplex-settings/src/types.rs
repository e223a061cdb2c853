//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may name only the fields it changes.

use echoplex_core::{InboundLimit, RelayConfig};
use echoplex_logging::{LogFormat, LogLevel};
use serde::{Deserialize, Serialize};

/// Root settings.
///
/// ```json
/// {
///   "server": { "port": 9100 },
///   "pipeline": { "duplexLimit": "unbounded" },
///   "relay": { "capacity": 16, "unobserved": "drop" },
///   "logging": { "level": "debug", "format": "json" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EchoplexSettings {
    /// Listener and connection limits.
    pub server: ServerSettings,
    /// Per-route pipeline limits.
    pub pipeline: PipelineSettings,
    /// Shared relay sink.
    pub relay: RelayConfig,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Server network and runtime settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (0 for auto-assign).
    pub port: u16,
    /// Live WebSocket connections accepted before upgrades are refused.
    pub max_connections: usize,
    /// Largest accepted WebSocket message, in bytes.
    pub max_message_size: usize,
    /// How long shutdown waits for live connections, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9000,
            max_connections: 1024,
            max_message_size: 64 * 1024,
            shutdown_timeout_ms: 5_000,
        }
    }
}

/// Inbound limits of the pipeline-backed routes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    /// `/duplex` completes after this many inbound messages.
    pub duplex_limit: InboundLimit,
    /// `/client-to-server` closes after relaying this many messages.
    pub relay_close_after: InboundLimit,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            duplex_limit: InboundLimit::Bounded(3),
            relay_close_after: InboundLimit::Bounded(1),
        }
    }
}

/// Logging settings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level.
    pub level: LogLevel,
    /// Output format.
    pub format: LogFormat,
}
