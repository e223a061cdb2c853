//! # echoplex-server
//!
//! Axum HTTP + `WebSocket` server for the echoplex routes.
//!
//! - One WebSocket route per [`echoplex_core::Route`], each driving its handler
//!   over an adapted [`echoplex_core::Connection`]
//! - `GET /health`: status, uptime, live connections, relay counters
//! - Connection registry enforcing `max_connections` (503 when full)
//! - Graceful shutdown via `CancellationToken`: live pipelines are cancelled
//!   and close frames flushed before the process exits

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::EchoplexServer;
