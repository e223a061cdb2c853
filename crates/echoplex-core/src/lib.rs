//! # echoplex-core
//!
//! Transport-agnostic core of the echoplex demonstration server.
//!
//! - [`connection::Connection`]: one bidirectional message channel with
//!   request headers and a lifecycle state machine
//! - [`pipeline`]: echo-with-transform and duplex observation over a connection
//! - [`transform`]: per-message transforms (`double_integer`, `uppercase`)
//! - [`relay::RelaySink`]: the shared many-to-one sink behind `/client-to-server`
//! - [`handlers`]: the five route handlers wired on top of the pipeline
//! - [`memory`]: in-memory transport for driving handlers without sockets

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod handlers;
pub mod headers;
pub mod memory;
pub mod message;
pub mod pipeline;
pub mod relay;
pub mod transform;

pub use connection::{Connection, ConnectionState};
pub use errors::{ConnectionError, PipelineError, RelayRecvError, TransformError};
pub use handlers::{HandlerContext, Route};
pub use headers::Headers;
pub use message::Message;
pub use pipeline::{Completion, DuplexReport, InboundLimit, PipelineReport};
pub use relay::{
    EmitOutcome, RelayConfig, RelaySink, RelayStats, RelaySubscription, UnobservedPolicy,
};
