//! # relay-settings
//!
//! Configuration for a relay process, loaded from three layers (in priority
//! order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: `~/.relay/settings.json` or `$RELAY_SETTINGS_PATH`
//! 3. **Environment variables**: `REDIS_URL` and `RELAY_*` overrides
//!
//! Settings are read once at process start; the shared-backend choice made
//! from them holds for the lifetime of the process.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_with, deep_merge,
    load_settings_from_path, settings_path,
};
pub use types::*;
