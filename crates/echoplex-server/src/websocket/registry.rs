//! Live connection registry.
//!
//! A slot is reserved when the upgrade request arrives (before the
//! handshake completes) so `max_connections` also bounds pending upgrades.
//! The returned [`ConnectionTicket`] releases the slot on drop, whether the
//! session ran to completion or the upgrade never happened.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use echoplex_core::{ConnectionState, Route};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

/// Snapshot of one live connection.
#[derive(Clone, Debug, Serialize)]
pub struct ConnectionInfo {
    /// Connection ID.
    pub id: String,
    /// Route it was opened on.
    pub route: Route,
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Time since the upgrade request.
    #[serde(serialize_with = "serialize_millis")]
    pub age: Duration,
}

struct Entry {
    route: Route,
    state: ConnectionState,
    connected_at: Instant,
}

/// Tracks live WebSocket connections and enforces the connection limit.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Entry>>,
    /// Atomic counter tracking live connections (avoids read-locking for count queries).
    active_count: AtomicUsize,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a registry admitting at most `max_connections` at once.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            active_count: AtomicUsize::new(0),
            max_connections,
        }
    }

    /// Reserve a slot for a new connection on `route`.
    ///
    /// Returns `None` when the registry is full.
    pub fn try_reserve(self: &Arc<Self>, route: Route) -> Option<ConnectionTicket> {
        let mut conns = self.connections.write();
        if conns.len() >= self.max_connections {
            warn!(
                route = route.as_str(),
                max = self.max_connections,
                "connection limit reached, refusing upgrade"
            );
            return None;
        }

        let id = Uuid::now_v7().to_string();
        let _ = conns.insert(
            id.clone(),
            Entry {
                route,
                state: ConnectionState::AwaitingHandshake,
                connected_at: Instant::now(),
            },
        );
        let _ = self.active_count.fetch_add(1, Ordering::Relaxed);
        debug!(conn_id = %id, route = route.as_str(), "connection slot reserved");

        Some(ConnectionTicket {
            id,
            registry: Arc::clone(self),
        })
    }

    /// Number of live connections (including pending upgrades).
    pub fn connection_count(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }

    /// Configured maximum.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Snapshot of every live connection, oldest first.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let conns = self.connections.read();
        let mut out: Vec<_> = conns
            .iter()
            .map(|(id, e)| ConnectionInfo {
                id: id.clone(),
                route: e.route,
                state: e.state,
                age: e.connected_at.elapsed(),
            })
            .collect();
        out.sort_by(|a, b| b.age.cmp(&a.age));
        out
    }

    fn set_state(&self, id: &str, state: ConnectionState) {
        if let Some(entry) = self.connections.write().get_mut(id) {
            entry.state = state;
        }
    }

    fn release(&self, id: &str) {
        if self.connections.write().remove(id).is_some() {
            let _ = self.active_count.fetch_sub(1, Ordering::Relaxed);
            debug!(conn_id = %id, "connection slot released");
        }
    }
}

/// A reserved registry slot. Dropping it removes the connection.
pub struct ConnectionTicket {
    id: String,
    registry: Arc<ConnectionRegistry>,
}

impl ConnectionTicket {
    /// Connection ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Record a lifecycle transition.
    pub fn set_state(&self, state: ConnectionState) {
        self.registry.set_state(&self.id, state);
    }
}

impl Drop for ConnectionTicket {
    fn drop(&mut self) {
        self.registry.release(&self.id);
    }
}

impl std::fmt::Debug for ConnectionTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionTicket").field("id", &self.id).finish()
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
