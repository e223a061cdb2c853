//! # echoplex-settings
//!
//! Configuration with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`EchoplexSettings::default()`]
//! 2. **Settings file**: `$ECHOPLEX_SETTINGS` or `~/.echoplex/settings.json`
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `ECHOPLEX_*` overrides
//!
//! The binary applies CLI flags on top of the loaded value.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path, validate,
};
pub use types::{EchoplexSettings, LoggingSettings, PipelineSettings, ServerSettings};
