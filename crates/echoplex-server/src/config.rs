//! Server configuration.

use std::time::Duration;

use echoplex_core::{InboundLimit, RelayConfig};
use echoplex_settings::EchoplexSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the echoplex server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// How long shutdown waits for live connections, in milliseconds.
    pub shutdown_timeout_ms: u64,
    /// `/duplex` inbound limit.
    pub duplex_limit: InboundLimit,
    /// `/client-to-server` inbound limit.
    pub relay_close_after: InboundLimit,
    /// Relay sink configuration.
    pub relay: RelayConfig,
}

impl ServerConfig {
    /// Shutdown timeout as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1024,
            max_message_size: 64 * 1024,
            shutdown_timeout_ms: 5_000,
            duplex_limit: InboundLimit::Bounded(3),
            relay_close_after: InboundLimit::Bounded(1),
            relay: RelayConfig::default(),
        }
    }
}

impl From<&EchoplexSettings> for ServerConfig {
    fn from(settings: &EchoplexSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_connections: settings.server.max_connections,
            max_message_size: settings.server.max_message_size,
            shutdown_timeout_ms: settings.server.shutdown_timeout_ms,
            duplex_limit: settings.pipeline.duplex_limit,
            relay_close_after: settings.pipeline.relay_close_after,
            relay: settings.relay,
        }
    }
}
