//! WebSocket plumbing: the axum transport adapter and the live connection registry.

pub mod adapter;
pub mod registry;
