//! Error types for connections, transforms and pipelines.

use std::num::ParseIntError;

use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors raised by a [`Connection`](crate::connection::Connection).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// The connection is closing or closed; the write was discarded.
    #[error("connection is {state}")]
    Closed {
        /// State at the time of the rejected operation.
        state: ConnectionState,
    },
    /// A pipeline already took the inbound sequence.
    #[error("inbound sequence already attached to a pipeline")]
    AlreadyReceiving,
}

impl ConnectionError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Closed { .. } => "closed",
            Self::AlreadyReceiving => "already_receiving",
        }
    }
}

/// A per-message transform rejected its input.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    /// Input text is not a base-10 integer.
    #[error("invalid integer {input:?}: {source}")]
    InvalidInteger {
        /// The offending input.
        input: String,
        /// Parser error.
        #[source]
        source: ParseIntError,
    },
    /// Doubling the parsed value overflows.
    #[error("integer overflow doubling {value}")]
    Overflow {
        /// Parsed value that could not be doubled.
        value: i64,
    },
}

impl TransformError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidInteger { .. } => "invalid_integer",
            Self::Overflow { .. } => "overflow",
        }
    }
}

/// Terminal error of a pipeline run. Local to one connection.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// The transform rejected an inbound message.
    #[error(transparent)]
    Transform(#[from] TransformError),
    /// The connection failed while reading or writing.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl PipelineError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Transform(e) => e.error_kind(),
            Self::Connection(e) => e.error_kind(),
        }
    }
}

/// A relay subscription can no longer receive.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum RelayRecvError {
    /// The relay sink was dropped and the backlog is drained.
    #[error("relay sink closed")]
    Closed,
}

impl RelayRecvError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Closed => "relay_closed",
        }
    }
}
