//! In-memory transport.
//!
//! [`pair`] returns a [`Connection`] plus the [`Peer`] that drives it, backed
//! by unbounded `futures` channels. Used by unit tests and anything that wants
//! to run a handler without a socket.

use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};

use crate::connection::Connection;
use crate::errors::ConnectionError;
use crate::headers::Headers;
use crate::message::Message;

/// Remote end of an in-memory connection.
pub struct Peer {
    inbound_tx: mpsc::UnboundedSender<Result<Message, ConnectionError>>,
    outbound_rx: mpsc::UnboundedReceiver<Message>,
    server_closed: bool,
}

/// Build a connected `(Connection, Peer)` pair.
pub fn pair(headers: Headers) -> (Connection, Peer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded();
    let (outbound_tx, outbound_rx) = mpsc::unbounded();

    let outbound = outbound_tx.sink_map_err(|e| ConnectionError::Transport(e.to_string()));
    let conn = Connection::new(
        format!("mem_{}", next_id()),
        headers,
        inbound_rx.boxed(),
        Box::pin(outbound),
    );

    let peer = Peer {
        inbound_tx,
        outbound_rx,
        server_closed: false,
    };
    (conn, peer)
}

impl Peer {
    /// Deliver a message to the connection's inbound side.
    pub fn send(&self, message: impl Into<Message>) -> bool {
        self.inbound_tx.unbounded_send(Ok(message.into())).is_ok()
    }

    /// Deliver a transport error to the inbound side.
    pub fn fail(&self, error: ConnectionError) -> bool {
        self.inbound_tx.unbounded_send(Err(error)).is_ok()
    }

    /// Finish the inbound side, as a peer close frame would.
    pub fn close(&mut self) {
        self.inbound_tx.close_channel();
    }

    /// Next outbound message, or `None` once the connection closed its sink.
    pub async fn next(&mut self) -> Option<Message> {
        let next = self.outbound_rx.next().await;
        if next.is_none() {
            self.server_closed = true;
        }
        next
    }

    /// Next outbound message as text.
    pub async fn next_text(&mut self) -> Option<String> {
        self.next().await.map(Message::into_text)
    }

    /// Drain outbound messages until the connection closes its sink.
    pub async fn collect_text(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(text) = self.next_text().await {
            out.push(text);
        }
        out
    }

    /// Outbound message already queued, without waiting.
    pub fn try_next(&mut self) -> Option<Message> {
        match self.outbound_rx.try_next() {
            Ok(Some(message)) => Some(message),
            Ok(None) => {
                self.server_closed = true;
                None
            }
            Err(_) => None,
        }
    }

    /// Whether the connection has been observed closing its outbound side.
    pub fn is_closed_by_server(&self) -> bool {
        self.server_closed
    }
}

fn next_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}
