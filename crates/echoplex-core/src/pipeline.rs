//! Message transform pipeline.
//!
//! Two shapes of per-connection data flow:
//!
//! - [`run_echo`]: inbound → transform → outbound, one message at a time, in
//!   arrival order.
//! - [`run_duplex`]: an independent outbound stream is emitted while inbound
//!   messages are observed concurrently.
//!
//! Both run on the caller's task and suspend only on "next inbound message"
//! and "outbound sink ready". Both stop on peer close, on reaching the
//! [`InboundLimit`], on error, or when the cancellation token fires.
//!
//! A cancelled run drops the inbound stream and abandons a write still
//! waiting for sink capacity; that message is never delivered. A message the
//! transport has already accepted but not yet flushed stays in the
//! transport's buffer and goes out with the close frame. Either way it is not
//! counted in `sent`.

use std::fmt;
use std::pin::pin;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::connection::{Connection, Inbound};
use crate::errors::{ConnectionError, PipelineError};
use crate::message::Message;
use crate::transform::TransformResult;

/// How many inbound messages a pipeline handles before completing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InboundLimit {
    /// Complete after this many inbound messages.
    Bounded(usize),
    /// Run until the peer closes or the run is cancelled.
    Unbounded,
}

impl InboundLimit {
    /// Whether `observed` messages satisfy the limit.
    pub fn is_reached(self, observed: usize) -> bool {
        match self {
            Self::Bounded(n) => observed >= n,
            Self::Unbounded => false,
        }
    }
}

impl fmt::Display for InboundLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded(n) => write!(f, "bounded({n})"),
            Self::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// Why a pipeline run ended without error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// The inbound sequence ended.
    PeerClosed,
    /// The configured inbound limit was reached.
    LimitReached,
    /// The handler finished its outbound sequence.
    OutboundComplete,
    /// The cancellation token fired.
    Cancelled,
}

impl Completion {
    /// Stable lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::LimitReached => "limit_reached",
            Self::OutboundComplete => "outbound_complete",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of a completed run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    /// Why the run ended.
    pub completion: Completion,
    /// Inbound messages consumed.
    pub received: usize,
    /// Outbound messages written.
    pub sent: usize,
}

impl PipelineReport {
    /// Report for a handler that only wrote `sent` messages.
    pub fn outbound_only(sent: usize) -> Self {
        Self {
            completion: Completion::OutboundComplete,
            received: 0,
            sent,
        }
    }
}

/// Summary of a [`run_duplex`] run, including what was observed inbound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuplexReport {
    /// Why the run ended.
    pub completion: Completion,
    /// Inbound messages in arrival order.
    pub observed: Vec<Message>,
    /// Outbound messages written from the independent stream.
    pub sent: usize,
}

impl DuplexReport {
    /// Observed messages as text.
    pub fn observed_text(&self) -> Vec<String> {
        self.observed.iter().map(|m| m.to_text().into_owned()).collect()
    }
}

#[derive(Default)]
struct Tally {
    received: usize,
    sent: usize,
}

/// Echo every inbound message through `transform`.
///
/// A transform error ends the run with [`PipelineError::Transform`]; replies
/// produced before the failing message have already been written.
pub async fn run_echo<F>(
    conn: &mut Connection,
    mut transform: F,
    limit: InboundLimit,
    cancel: &CancellationToken,
) -> Result<PipelineReport, PipelineError>
where
    F: FnMut(Message) -> TransformResult + Send,
{
    let mut inbound = conn.receive()?;
    let mut tally = Tally::default();

    let finished = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        res = echo_loop(conn, &mut inbound, &mut transform, limit, &mut tally) => Some(res),
    };
    drop(inbound);

    let completion = match finished {
        None => Completion::Cancelled,
        Some(res) => res?,
    };
    if completion == Completion::PeerClosed {
        conn.peer_closed();
    }
    debug!(
        conn_id = conn.id(),
        %completion,
        received = tally.received,
        sent = tally.sent,
        "echo pipeline finished"
    );
    Ok(PipelineReport {
        completion,
        received: tally.received,
        sent: tally.sent,
    })
}

async fn echo_loop<F>(
    conn: &mut Connection,
    inbound: &mut Inbound,
    transform: &mut F,
    limit: InboundLimit,
    tally: &mut Tally,
) -> Result<Completion, PipelineError>
where
    F: FnMut(Message) -> TransformResult,
{
    if limit.is_reached(tally.received) {
        return Ok(Completion::LimitReached);
    }
    while let Some(item) = inbound.next().await {
        let message = item?;
        tally.received += 1;
        trace!(conn_id = conn.id(), seq = tally.received, kind = message.kind(), "inbound");

        if let Some(reply) = transform(message)? {
            conn.send_one(reply).await?;
            tally.sent += 1;
        }
        if limit.is_reached(tally.received) {
            return Ok(Completion::LimitReached);
        }
    }
    Ok(Completion::PeerClosed)
}

/// Emit `outbound` while observing inbound messages.
///
/// Emission starts immediately and does not wait for inbound traffic. The
/// run completes once `limit` inbound messages are observed (an unfinished
/// emission is abandoned), when the peer closes, or on cancellation.
pub async fn run_duplex<S>(
    conn: &mut Connection,
    outbound: S,
    limit: InboundLimit,
    cancel: &CancellationToken,
) -> Result<DuplexReport, PipelineError>
where
    S: Stream<Item = Message> + Send,
{
    let mut inbound = conn.receive()?;
    let mut observed = Vec::new();
    let mut sent = 0usize;

    let completion = {
        let mut emit = pin!(async {
            let mut outbound = pin!(outbound);
            while let Some(message) = outbound.next().await {
                conn.send_one(message).await?;
                sent += 1;
            }
            Ok::<(), ConnectionError>(())
        });
        let mut observing = pin!(observe(&mut inbound, limit, &mut observed));
        let mut emitting = true;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break Completion::Cancelled,
                res = &mut emit, if emitting => {
                    emitting = false;
                    res?;
                }
                res = &mut observing => break res?,
            }
        }
    };
    drop(inbound);

    if completion == Completion::PeerClosed {
        conn.peer_closed();
    }
    debug!(
        conn_id = conn.id(),
        %completion,
        observed = observed.len(),
        sent,
        "duplex pipeline finished"
    );
    Ok(DuplexReport {
        completion,
        observed,
        sent,
    })
}

async fn observe(
    inbound: &mut Inbound,
    limit: InboundLimit,
    observed: &mut Vec<Message>,
) -> Result<Completion, ConnectionError> {
    if limit.is_reached(observed.len()) {
        return Ok(Completion::LimitReached);
    }
    while let Some(item) = inbound.next().await {
        observed.push(item?);
        if limit.is_reached(observed.len()) {
            return Ok(Completion::LimitReached);
        }
    }
    Ok(Completion::PeerClosed)
}
