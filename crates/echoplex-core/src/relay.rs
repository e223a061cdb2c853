//! Shared relay sink.
//!
//! Every `/client-to-server` connection forwards into one [`RelaySink`];
//! any number of [`RelaySubscription`]s observe it. Delivery to live
//! subscribers goes through a bounded `tokio::sync::broadcast` channel, so a
//! subscriber that falls more than `capacity` messages behind loses the
//! oldest ones and logs the lag. While nobody is subscribed the
//! [`UnobservedPolicy`] decides what happens to emitted text.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};

use crate::errors::RelayRecvError;

/// Default broadcast and backlog capacity.
pub const DEFAULT_CAPACITY: usize = 64;

/// Largest accepted capacity. The broadcast channel allocates every slot up front.
pub const MAX_CAPACITY: usize = 1_000_000;

/// What to do with emitted text while no subscriber is attached.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnobservedPolicy {
    /// Keep up to `capacity` messages (oldest dropped first) and hand them to
    /// the next subscriber.
    #[default]
    Buffer,
    /// Discard immediately.
    Drop,
}

/// Relay sink configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayConfig {
    /// Broadcast channel capacity, and backlog capacity under [`UnobservedPolicy::Buffer`].
    pub capacity: usize,
    /// Unobserved-emit policy.
    pub unobserved: UnobservedPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            unobserved: UnobservedPolicy::Buffer,
        }
    }
}

/// Result of a single [`RelaySink::emit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmitOutcome {
    /// Handed to this many live subscribers.
    Delivered(usize),
    /// No subscriber; kept in the backlog.
    Buffered,
    /// No subscriber; discarded.
    Dropped,
}

/// Point-in-time relay counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStats {
    /// Total messages emitted.
    pub emitted: u64,
    /// Messages discarded while unobserved (policy or backlog overflow).
    pub dropped: u64,
    /// Messages currently waiting in the backlog.
    pub buffered: usize,
    /// Live subscribers.
    pub subscribers: usize,
}

/// Many-to-one sink shared by relay connections.
pub struct RelaySink {
    tx: broadcast::Sender<String>,
    backlog: Mutex<VecDeque<String>>,
    config: RelayConfig,
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl RelaySink {
    /// Create a sink. The capacity is clamped to `1..=MAX_CAPACITY`.
    pub fn new(config: RelayConfig) -> Self {
        let config = RelayConfig {
            capacity: config.capacity.clamp(1, MAX_CAPACITY),
            ..config
        };
        let (tx, _) = broadcast::channel(config.capacity);
        Self {
            tx,
            backlog: Mutex::new(VecDeque::new()),
            config,
            emitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Effective configuration.
    pub fn config(&self) -> RelayConfig {
        self.config
    }

    /// Forward one message.
    pub fn emit(&self, text: impl Into<String>) -> EmitOutcome {
        let text = text.into();
        let _ = self.emitted.fetch_add(1, Ordering::Relaxed);

        // Held across the send so a concurrent subscribe sees either the
        // backlog entry or the broadcast, never neither.
        let mut backlog = self.backlog.lock();
        let text = match self.tx.send(text) {
            Ok(receivers) => {
                debug!(receivers, "relay delivered");
                return EmitOutcome::Delivered(receivers);
            }
            Err(broadcast::error::SendError(text)) => text,
        };

        match self.config.unobserved {
            UnobservedPolicy::Drop => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("relay unobserved, message dropped");
                EmitOutcome::Dropped
            }
            UnobservedPolicy::Buffer => {
                if backlog.len() >= self.config.capacity {
                    let _ = backlog.pop_front();
                    let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        capacity = self.config.capacity,
                        total_dropped = total,
                        "relay backlog full, dropped oldest"
                    );
                }
                backlog.push_back(text);
                EmitOutcome::Buffered
            }
        }
    }

    /// Attach a subscriber. The first subscriber after an unobserved period
    /// receives the backlog before live traffic.
    pub fn subscribe(&self) -> RelaySubscription {
        let mut backlog = self.backlog.lock();
        let rx = self.tx.subscribe();
        let pending = std::mem::take(&mut *backlog);
        if !pending.is_empty() {
            debug!(count = pending.len(), "relay backlog handed to subscriber");
        }
        RelaySubscription {
            backlog: pending,
            rx,
            lagged: 0,
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Current counters.
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            emitted: self.emitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            buffered: self.backlog.lock().len(),
            subscribers: self.tx.receiver_count(),
        }
    }
}

impl Default for RelaySink {
    fn default() -> Self {
        Self::new(RelayConfig::default())
    }
}

/// A consumer attached to a [`RelaySink`].
pub struct RelaySubscription {
    backlog: VecDeque<String>,
    rx: broadcast::Receiver<String>,
    lagged: u64,
}

impl RelaySubscription {
    /// Next relayed message. Lagged messages are skipped.
    pub async fn recv(&mut self) -> Result<String, RelayRecvError> {
        if let Some(text) = self.backlog.pop_front() {
            return Ok(text);
        }
        loop {
            match self.rx.recv().await {
                Ok(text) => return Ok(text),
                Err(RecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(RecvError::Closed) => return Err(RelayRecvError::Closed),
            }
        }
    }

    /// Next relayed message if one is ready.
    pub fn try_recv(&mut self) -> Option<String> {
        if let Some(text) = self.backlog.pop_front() {
            return Some(text);
        }
        loop {
            match self.rx.try_recv() {
                Ok(text) => return Some(text),
                Err(TryRecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Messages this subscriber missed by lagging.
    pub fn lagged(&self) -> u64 {
        self.lagged
    }

    fn record_lag(&mut self, skipped: u64) {
        self.lagged += skipped;
        warn!(skipped, total = self.lagged, "relay subscriber lagged");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(capacity: usize, unobserved: UnobservedPolicy) -> RelaySink {
        RelaySink::new(RelayConfig { capacity, unobserved })
    }

    #[tokio::test]
    async fn live_subscriber_receives() {
        let relay = RelaySink::default();
        let mut sub = relay.subscribe();
        assert_eq!(relay.emit("Awesome"), EmitOutcome::Delivered(1));
        assert_eq!(sub.recv().await.unwrap(), "Awesome");
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_message() {
        let relay = RelaySink::default();
        let mut a = relay.subscribe();
        let mut b = relay.subscribe();
        assert_eq!(relay.emit("x"), EmitOutcome::Delivered(2));
        assert_eq!(a.recv().await.unwrap(), "x");
        assert_eq!(b.recv().await.unwrap(), "x");
    }

    #[tokio::test]
    async fn unobserved_messages_buffered_for_next_subscriber() {
        let relay = sink(4, UnobservedPolicy::Buffer);
        assert_eq!(relay.emit("one"), EmitOutcome::Buffered);
        assert_eq!(relay.emit("two"), EmitOutcome::Buffered);
        assert_eq!(relay.stats().buffered, 2);

        let mut sub = relay.subscribe();
        let _ = relay.emit("three");
        assert_eq!(sub.recv().await.unwrap(), "one");
        assert_eq!(sub.recv().await.unwrap(), "two");
        assert_eq!(sub.recv().await.unwrap(), "three");
        assert_eq!(relay.stats().buffered, 0);
    }

    #[test]
    fn backlog_drops_oldest_when_full() {
        let relay = sink(2, UnobservedPolicy::Buffer);
        for text in ["a", "b", "c"] {
            let _ = relay.emit(text);
        }
        let stats = relay.stats();
        assert_eq!(stats.emitted, 3);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.buffered, 2);

        let mut sub = relay.subscribe();
        assert_eq!(sub.try_recv().as_deref(), Some("b"));
        assert_eq!(sub.try_recv().as_deref(), Some("c"));
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn drop_policy_discards_unobserved() {
        let relay = sink(4, UnobservedPolicy::Drop);
        assert_eq!(relay.emit("gone"), EmitOutcome::Dropped);
        let mut sub = relay.subscribe();
        assert_eq!(sub.try_recv(), None);
        assert_eq!(relay.stats().dropped, 1);
    }

    #[test]
    fn backlog_goes_to_one_subscriber_only() {
        let relay = RelaySink::default();
        let _ = relay.emit("once");
        let mut first = relay.subscribe();
        let mut second = relay.subscribe();
        assert_eq!(first.try_recv().as_deref(), Some("once"));
        assert_eq!(second.try_recv(), None);
    }

    #[tokio::test]
    async fn slow_subscriber_lags_and_skips_oldest() {
        let relay = sink(2, UnobservedPolicy::Buffer);
        let mut sub = relay.subscribe();
        for n in 0..5 {
            let _ = relay.emit(n.to_string());
        }
        assert_eq!(sub.recv().await.unwrap(), "3");
        assert_eq!(sub.recv().await.unwrap(), "4");
        assert_eq!(sub.lagged(), 3);
    }

    #[tokio::test]
    async fn dropped_subscriber_returns_to_unobserved() {
        let relay = RelaySink::default();
        let sub = relay.subscribe();
        assert_eq!(relay.subscriber_count(), 1);
        drop(sub);
        assert_eq!(relay.subscriber_count(), 0);
        assert_eq!(relay.emit("later"), EmitOutcome::Buffered);
    }

    #[tokio::test]
    async fn closed_when_sink_dropped() {
        let relay = RelaySink::default();
        let mut sub = relay.subscribe();
        drop(relay);
        assert_eq!(sub.recv().await.unwrap_err(), RelayRecvError::Closed);
    }

    #[test]
    fn zero_capacity_is_raised() {
        let relay = sink(0, UnobservedPolicy::Buffer);
        assert_eq!(relay.config().capacity, 1);
    }

    #[test]
    fn oversized_capacity_is_clamped() {
        let relay = sink(usize::MAX, UnobservedPolicy::Buffer);
        assert_eq!(relay.config().capacity, MAX_CAPACITY);
        assert_eq!(relay.emit("still works"), EmitOutcome::Buffered);
    }

    #[test]
    fn config_serde_defaults() {
        let cfg: RelayConfig = serde_json::from_str(r#"{"unobserved":"drop"}"#).unwrap();
        assert_eq!(cfg.capacity, DEFAULT_CAPACITY);
        assert_eq!(cfg.unobserved, UnobservedPolicy::Drop);
    }
}
