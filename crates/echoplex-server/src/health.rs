//! `/health` endpoint.

use std::time::Instant;

use echoplex_core::RelayStats;
use serde::Serialize;

use crate::websocket::registry::ConnectionInfo;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"shutting_down"` once shutdown began.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live WebSocket connections, including pending upgrades.
    pub connections: usize,
    /// One entry per live connection, oldest first.
    pub live: Vec<ConnectionInfo>,
    /// Relay sink counters.
    pub relay: RelayStats,
}

/// Build a health response from a registry snapshot and relay counters.
pub fn health_check(
    start_time: Instant,
    shutting_down: bool,
    live: Vec<ConnectionInfo>,
    relay: RelayStats,
) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "shutting_down" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: live.len(),
        live,
        relay,
    }
}
