//! # echoplex
//!
//! echoplex server binary: loads settings, installs logging, serves the
//! WebSocket routes until ctrl-c, then shuts down gracefully.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use echoplex_logging::{LogFormat, LogLevel};
use echoplex_server::{EchoplexServer, ServerConfig};
use echoplex_settings::EchoplexSettings;

/// echoplex WebSocket demonstration server.
#[derive(Parser, Debug)]
#[command(name = "echoplex", about = "WebSocket echo, relay and duplex demonstration server")]
struct Cli {
    /// Host to bind (overrides settings if specified).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings if specified).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `$ECHOPLEX_SETTINGS` or `~/.echoplex/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Minimum log level: trace, debug, info, warn, error.
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format: pretty or json.
    #[arg(long)]
    log_format: Option<String>,

    /// Maximum concurrent WebSocket connections.
    #[arg(long)]
    max_connections: Option<usize>,
}

impl Cli {
    /// Apply flags over loaded settings (highest priority layer).
    fn apply(&self, settings: &mut EchoplexSettings) -> Result<()> {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(max) = self.max_connections {
            settings.server.max_connections = max;
        }
        if let Some(level) = &self.log_level {
            let Some(level) = LogLevel::parse(level) else {
                bail!("invalid --log-level {level:?}");
            };
            settings.logging.level = level;
        }
        if let Some(format) = &self.log_format {
            let Some(format) = LogFormat::parse(format) else {
                bail!("invalid --log-format {format:?}");
            };
            settings.logging.format = format;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Settings first: the log level comes from them.
    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(echoplex_settings::settings_path);
    let mut settings = echoplex_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings)?;
    echoplex_settings::validate(&settings).context("Invalid settings")?;

    echoplex_logging::init_subscriber(settings.logging.level, settings.logging.format)
        .context("Failed to initialize logging")?;
    tracing::debug!(path = %settings_path.display(), ?settings, "settings loaded");

    let server = EchoplexServer::new(ServerConfig::from(&settings));
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("echoplex listening on ws://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown_gracefully(handle).await;
    tracing::info!("Shutdown complete");
    Ok(())
}
