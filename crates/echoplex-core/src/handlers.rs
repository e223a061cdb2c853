//! Route handlers.
//!
//! Each handler is a plain async function over `&mut Connection`. Handlers do
//! not close the connection themselves; [`dispatch`] runs the handler for a
//! [`Route`] and always closes afterwards, which is what sends the close
//! frame to the peer.

use std::fmt;
use std::sync::Arc;

use futures::stream;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::errors::PipelineError;
use crate::headers::Headers;
use crate::message::Message;
use crate::pipeline::{self, InboundLimit, PipelineReport};
use crate::relay::RelaySink;
use crate::transform;

/// Sequence sent by `/server-to-client`.
pub const FIXED_SEQUENCE: [&str; 3] = ["Hello", "World", ":)"];

/// Plain-text greeting for `/header`.
pub const PLAIN_REPLY: &str = "Hello World!";

/// JSON greeting for `/header`.
pub const JSON_REPLY: &str = r#"{"message":"Hello World!"}"#;

/// Content type assumed when the header is absent.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// The WebSocket routes served.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Route {
    /// Relay inbound text to the shared sink.
    ClientToServer,
    /// Send the fixed three-message sequence.
    ServerToClient,
    /// Double integers, three inbound messages.
    Duplex,
    /// Uppercase forever.
    DuplexInfinite,
    /// Reply according to `Content-Type`.
    Header,
}

impl Route {
    /// Every route, in registration order.
    pub const ALL: [Route; 5] = [
        Self::ClientToServer,
        Self::ServerToClient,
        Self::Duplex,
        Self::DuplexInfinite,
        Self::Header,
    ];

    /// Label used in logs and the connection registry.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientToServer => "client-to-server",
            Self::ServerToClient => "server-to-client",
            Self::Duplex => "duplex",
            Self::DuplexInfinite => "duplex-infinite",
            Self::Header => "header",
        }
    }

    /// URL path.
    pub fn path(self) -> &'static str {
        match self {
            Self::ClientToServer => "/client-to-server",
            Self::ServerToClient => "/server-to-client",
            Self::Duplex => "/duplex",
            Self::DuplexInfinite => "/duplex-infinite",
            Self::Header => "/header",
        }
    }

    /// Look up a route by URL path.
    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.path() == path)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct HandlerContext {
    /// Sink behind `/client-to-server`.
    pub relay: Arc<RelaySink>,
    /// Inbound limit for `/duplex`.
    pub duplex_limit: InboundLimit,
    /// How many inbound messages `/client-to-server` relays before closing.
    pub relay_close_after: InboundLimit,
    /// Cancels every pipeline started with this context.
    pub cancel: CancellationToken,
}

impl HandlerContext {
    /// Context with default limits around `relay`.
    pub fn new(relay: Arc<RelaySink>) -> Self {
        Self {
            relay,
            duplex_limit: InboundLimit::Bounded(3),
            relay_close_after: InboundLimit::Bounded(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Same context with a different cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl Default for HandlerContext {
    fn default() -> Self {
        Self::new(Arc::new(RelaySink::default()))
    }
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("duplex_limit", &self.duplex_limit)
            .field("relay_close_after", &self.relay_close_after)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Run the handler for `route`, then close the connection.
///
/// The handler's result is returned unchanged; a failed close is only logged.
pub async fn dispatch(
    route: Route,
    conn: &mut Connection,
    ctx: &HandlerContext,
) -> Result<PipelineReport, PipelineError> {
    let result = match route {
        Route::ClientToServer => client_to_server(conn, ctx).await,
        Route::ServerToClient => server_to_client(conn).await,
        Route::Duplex => duplex(conn, ctx).await,
        Route::DuplexInfinite => duplex_infinite(conn, ctx).await,
        Route::Header => header(conn).await,
    };

    match &result {
        Ok(report) => info!(
            conn_id = conn.id(),
            route = route.as_str(),
            completion = %report.completion,
            received = report.received,
            sent = report.sent,
            "handler finished"
        ),
        Err(e) => warn!(
            conn_id = conn.id(),
            route = route.as_str(),
            error_kind = e.error_kind(),
            error = %e,
            "handler failed"
        ),
    }

    // Also flushes a message the transport accepted before cancellation.
    if let Err(e) = conn.close().await {
        debug!(conn_id = conn.id(), error = %e, "close after handler failed");
    }
    result
}

/// `/client-to-server`: forward inbound text to the relay sink.
///
/// Nothing is written back. Completes after `ctx.relay_close_after` inbound
/// messages or when the peer closes.
pub async fn client_to_server(
    conn: &mut Connection,
    ctx: &HandlerContext,
) -> Result<PipelineReport, PipelineError> {
    let relay = &ctx.relay;
    pipeline::run_echo(
        conn,
        |message: Message| {
            let outcome = relay.emit(message.into_text());
            debug!(?outcome, "relayed");
            Ok(None)
        },
        ctx.relay_close_after,
        &ctx.cancel,
    )
    .await
}

/// `/server-to-client`: send [`FIXED_SEQUENCE`] without reading.
pub async fn server_to_client(conn: &mut Connection) -> Result<PipelineReport, PipelineError> {
    let sent = conn
        .send(stream::iter(FIXED_SEQUENCE.map(Message::text)))
        .await?;
    Ok(PipelineReport::outbound_only(sent))
}

/// `/duplex`: echo doubled integers.
pub async fn duplex(
    conn: &mut Connection,
    ctx: &HandlerContext,
) -> Result<PipelineReport, PipelineError> {
    pipeline::run_echo(conn, transform::double_integer, ctx.duplex_limit, &ctx.cancel).await
}

/// `/duplex-infinite`: echo uppercased text until cancelled or the peer closes.
pub async fn duplex_infinite(
    conn: &mut Connection,
    ctx: &HandlerContext,
) -> Result<PipelineReport, PipelineError> {
    pipeline::run_echo(conn, transform::uppercase, InboundLimit::Unbounded, &ctx.cancel).await
}

/// `/header`: one reply chosen by `Content-Type`, without reading.
pub async fn header(conn: &mut Connection) -> Result<PipelineReport, PipelineError> {
    let reply = select_reply(conn.headers());
    conn.send_one(Message::text(reply)).await?;
    Ok(PipelineReport::outbound_only(1))
}

/// Reply for a handshake carrying `headers`.
///
/// Only an exact `text/plain` gets the plain greeting; parameters such as
/// `; charset=utf-8` select the JSON form.
pub fn select_reply(headers: &Headers) -> &'static str {
    if headers.get_or("content-type", DEFAULT_CONTENT_TYPE) == DEFAULT_CONTENT_TYPE {
        PLAIN_REPLY
    } else {
        JSON_REPLY
    }
}
