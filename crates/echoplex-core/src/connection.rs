//! Transport-agnostic bidirectional connection.
//!
//! A [`Connection`] owns one inbound message stream and one outbound sink.
//! Transports (the axum adapter in `echoplex-server`, the in-memory pair in
//! [`crate::memory`]) box their halves into the [`Inbound`] / [`Outbound`]
//! aliases; handlers and pipelines never see the transport type.

use std::fmt;
use std::pin::{pin, Pin};

use futures::stream::BoxStream;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::errors::ConnectionError;
use crate::headers::Headers;
use crate::message::Message;

/// Inbound half: messages in arrival order, ending when the peer closes.
pub type Inbound = BoxStream<'static, Result<Message, ConnectionError>>;

/// Outbound half: accepts messages in the order they are written.
pub type Outbound = Pin<Box<dyn Sink<Message, Error = ConnectionError> + Send>>;

/// Connection lifecycle.
///
/// `AwaitingHandshake → Open → Closing → Closed`; there is no way back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Upgrade requested, handshake not yet complete.
    AwaitingHandshake,
    /// Both directions usable.
    Open,
    /// One side finished; flushing remaining traffic.
    Closing,
    /// Both directions done.
    Closed,
}

impl ConnectionState {
    /// Whether moving to `next` is a legal forward transition.
    pub fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::AwaitingHandshake, Self::Open | Self::Closed)
                | (Self::Open, Self::Closing | Self::Closed)
                | (Self::Closing, Self::Closed)
        )
    }

    /// Whether outbound writes are still accepted.
    pub fn is_writable(self) -> bool {
        matches!(self, Self::Open | Self::Closing)
    }

    /// Stable lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingHandshake => "awaiting_handshake",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bidirectional channel tied to one handshake.
pub struct Connection {
    id: String,
    headers: Headers,
    inbound: Option<Inbound>,
    outbound: Outbound,
    state: ConnectionState,
}

impl Connection {
    /// Wrap an established transport. The connection starts [`ConnectionState::Open`].
    pub fn new(
        id: impl Into<String>,
        headers: Headers,
        inbound: Inbound,
        outbound: Outbound,
    ) -> Self {
        Self {
            id: id.into(),
            headers,
            inbound: Some(inbound),
            outbound,
            state: ConnectionState::Open,
        }
    }

    /// Connection identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Handshake request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Take the inbound sequence. Succeeds once per connection.
    pub fn receive(&mut self) -> Result<Inbound, ConnectionError> {
        if self.state != ConnectionState::Open {
            return Err(ConnectionError::Closed { state: self.state });
        }
        self.inbound.take().ok_or(ConnectionError::AlreadyReceiving)
    }

    /// Write one message.
    pub async fn send_one(&mut self, message: Message) -> Result<(), ConnectionError> {
        self.ensure_writable()?;
        trace!(conn_id = %self.id, kind = message.kind(), len = message.len(), "send");
        self.outbound.send(message).await
    }

    /// Write every message of `messages` in order. Returns how many were written.
    ///
    /// Each message is flushed before the next is pulled, so a slow or
    /// unbounded producer is visible to the peer message by message.
    pub async fn send<S>(&mut self, messages: S) -> Result<usize, ConnectionError>
    where
        S: Stream<Item = Message>,
    {
        let mut messages = pin!(messages);
        let mut sent = 0;
        while let Some(message) = messages.next().await {
            self.send_one(message).await?;
            sent += 1;
        }
        Ok(sent)
    }

    /// Record that the peer finished its side.
    pub fn peer_closed(&mut self) {
        if self.state == ConnectionState::Open {
            self.advance(ConnectionState::Closing);
        }
    }

    /// Close both directions. Idempotent.
    ///
    /// Releases the inbound sequence if no pipeline took it and closes the
    /// outbound sink, which sends the transport's close signal.
    pub async fn close(&mut self) -> Result<(), ConnectionError> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        if self.state == ConnectionState::Open {
            self.advance(ConnectionState::Closing);
        }
        drop(self.inbound.take());
        let result = self.outbound.close().await;
        self.advance(ConnectionState::Closed);
        result
    }

    fn ensure_writable(&self) -> Result<(), ConnectionError> {
        if self.state.is_writable() {
            Ok(())
        } else {
            Err(ConnectionError::Closed { state: self.state })
        }
    }

    fn advance(&mut self, next: ConnectionState) {
        debug_assert!(self.state.can_advance_to(next), "{} -> {next}", self.state);
        debug!(conn_id = %self.id, from = %self.state, to = %next, "connection state");
        self.state = next;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("receiving", &self.inbound.is_none())
            .finish_non_exhaustive()
    }
}
