//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`EchoplexSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `ECHOPLEX_*` environment overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use echoplex_core::relay::MAX_CAPACITY;
use echoplex_core::{InboundLimit, UnobservedPolicy};
use echoplex_logging::{LogFormat, LogLevel};
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::EchoplexSettings;

/// Env var naming an explicit settings file.
pub const SETTINGS_PATH_ENV: &str = "ECHOPLEX_SETTINGS";

/// Resolve the settings file: `$ECHOPLEX_SETTINGS`, else `~/.echoplex/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(explicit) = std::env::var_os(SETTINGS_PATH_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(explicit);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".echoplex").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<EchoplexSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid final value is
/// an error.
pub fn load_settings_from_path(path: &Path) -> Result<EchoplexSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<EchoplexSettings> {
    let defaults = serde_json::to_value(EchoplexSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `ECHOPLEX_*` environment overrides.
///
/// Invalid values are ignored with a warning (falling back to file/default).
pub fn apply_env_overrides(settings: &mut EchoplexSettings) {
    apply_overrides(settings, |key| std::env::var(key).ok());
}

/// Apply overrides from an arbitrary key lookup.
///
/// Recognized keys:
///
/// | Key | Field |
/// |---|---|
/// | `ECHOPLEX_HOST` | `server.host` |
/// | `ECHOPLEX_PORT` | `server.port` |
/// | `ECHOPLEX_MAX_CONNECTIONS` | `server.maxConnections` |
/// | `ECHOPLEX_DUPLEX_LIMIT` | `pipeline.duplexLimit` (`unbounded` or a count) |
/// | `ECHOPLEX_RELAY_CAPACITY` | `relay.capacity` |
/// | `ECHOPLEX_RELAY_UNOBSERVED` | `relay.unobserved` (`buffer` / `drop`) |
/// | `ECHOPLEX_LOG_LEVEL` | `logging.level` |
/// | `ECHOPLEX_LOG_FORMAT` | `logging.format` |
pub fn apply_overrides(settings: &mut EchoplexSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |key: &str| lookup(key).filter(|v| !v.is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read("ECHOPLEX_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = parsed(&read, "ECHOPLEX_PORT", |s| s.parse::<u16>().ok()) {
        settings.server.port = v;
    }
    if let Some(v) = parsed(&read, "ECHOPLEX_MAX_CONNECTIONS", |s| {
        parse_usize_range(s, 1, 1_000_000)
    }) {
        settings.server.max_connections = v;
    }

    // ── Pipeline / relay ────────────────────────────────────────────
    if let Some(v) = parsed(&read, "ECHOPLEX_DUPLEX_LIMIT", parse_inbound_limit) {
        settings.pipeline.duplex_limit = v;
    }
    if let Some(v) = parsed(&read, "ECHOPLEX_RELAY_CAPACITY", |s| {
        parse_usize_range(s, 1, MAX_CAPACITY)
    }) {
        settings.relay.capacity = v;
    }
    if let Some(v) = parsed(&read, "ECHOPLEX_RELAY_UNOBSERVED", parse_unobserved_policy) {
        settings.relay.unobserved = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = parsed(&read, "ECHOPLEX_LOG_LEVEL", LogLevel::parse) {
        settings.logging.level = v;
    }
    if let Some(v) = parsed(&read, "ECHOPLEX_LOG_FORMAT", LogFormat::parse) {
        settings.logging.format = v;
    }
}

fn parsed<T>(
    read: &impl Fn(&str) -> Option<String>,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let val = read(key)?;
    let result = parse(&val);
    if result.is_none() {
        warn!(key, value = %val, "invalid env var, ignoring");
    }
    result
}

/// Reject settings the server cannot run with.
pub fn validate(settings: &EchoplexSettings) -> Result<()> {
    let invalid = |msg: &str| Err(SettingsError::InvalidValue(msg.to_string()));

    if settings.server.host.trim().is_empty() {
        return invalid("server.host must not be empty");
    }
    if settings.server.max_connections == 0 {
        return invalid("server.maxConnections must be at least 1");
    }
    if settings.server.max_message_size == 0 {
        return invalid("server.maxMessageSize must be at least 1");
    }
    if settings.relay.capacity == 0 || settings.relay.capacity > MAX_CAPACITY {
        return Err(SettingsError::InvalidValue(format!(
            "relay.capacity must be between 1 and {MAX_CAPACITY}"
        )));
    }
    if settings.pipeline.duplex_limit == InboundLimit::Bounded(0) {
        return invalid("pipeline.duplexLimit must be unbounded or at least 1");
    }
    if settings.pipeline.relay_close_after == InboundLimit::Bounded(0) {
        return invalid("pipeline.relayCloseAfter must be unbounded or at least 1");
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse `unbounded` or a positive count.
pub fn parse_inbound_limit(val: &str) -> Option<InboundLimit> {
    let val = val.trim();
    if val.eq_ignore_ascii_case("unbounded") {
        return Some(InboundLimit::Unbounded);
    }
    parse_usize_range(val, 1, usize::MAX).map(InboundLimit::Bounded)
}

/// Parse `buffer` or `drop` (case-insensitive).
pub fn parse_unobserved_policy(val: &str) -> Option<UnobservedPolicy> {
    match val.trim().to_lowercase().as_str() {
        "buffer" => Some(UnobservedPolicy::Buffer),
        "drop" => Some(UnobservedPolicy::Drop),
        _ => None,
    }
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
