//! # echoplex-logging
//!
//! Structured logging with `tracing`.
//!
//! [`init_subscriber`] installs a stderr subscriber in either compact or JSON
//! form. Connection context (`conn_id`, `route`) travels on spans opened by the
//! server, so every line logged inside a handler carries it.

#![deny(unsafe_code)]

pub mod types;

pub use types::{LogFormat, LogLevel};

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Subscriber installation failed.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// A global subscriber is already set.
    #[error("global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

impl LoggingError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AlreadyInitialized(_) => "already_initialized",
        }
    }
}

/// Filter for `level`. `RUST_LOG`, when set and valid, takes precedence.
pub fn build_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter_str()))
}

/// Initialize the global tracing subscriber writing to stderr.
///
/// Call once at application startup; later calls return
/// [`LoggingError::AlreadyInitialized`] and leave the first subscriber in place.
pub fn init_subscriber(level: LogLevel, format: LogFormat) -> Result<(), LoggingError> {
    let filter = build_filter(level);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let result = match format {
        LogFormat::Pretty => builder.compact().try_init(),
        LogFormat::Json => builder
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .try_init(),
    };
    result.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;
    tracing::debug!(%level, %format, "logging initialized");
    Ok(())
}
