//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::RelaySettings;

/// Env var that points at an alternative settings file.
pub const SETTINGS_PATH_ENV: &str = "RELAY_SETTINGS_PATH";

/// Resolve the settings file path.
///
/// `RELAY_SETTINGS_PATH` if set, otherwise `~/.relay/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(path) = read_env_string(SETTINGS_PATH_ENV) {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay").join("settings.json")
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

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

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_overrides_with(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Empty values are treated as unset. Values that fail to parse or fall out
/// of range are ignored with a warning, keeping the file/default value.
pub fn apply_overrides_with<F>(settings: &mut RelaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Shared backend ──────────────────────────────────────────────
    if let Some(v) = string("REDIS_URL") {
        settings.redis.url = Some(v);
    }
    if let Some(v) = string("RELAY_PRESENCE_KEY") {
        settings.redis.presence_key = v;
    }
    if let Some(v) = string("RELAY_CHANNEL") {
        settings.redis.channel = v;
    }

    // ── Connections / subscriber ────────────────────────────────────
    if let Some(v) = string("RELAY_SEND_BUFFER") {
        if let Some(n) = checked("RELAY_SEND_BUFFER", &v, parse_usize_range(&v, 1, 65_536)) {
            settings.connection.send_buffer = n;
        }
    }
    // base and max are checked against each other so a single override can
    // never produce an inverted pair that fails validation
    let base = string("RELAY_RECONNECT_BASE_MS").and_then(|v| {
        checked(
            "RELAY_RECONNECT_BASE_MS",
            &v,
            parse_u64_range(&v, 10, 600_000),
        )
    });
    let max = string("RELAY_RECONNECT_MAX_MS").and_then(|v| {
        checked(
            "RELAY_RECONNECT_MAX_MS",
            &v,
            parse_u64_range(&v, 10, 3_600_000),
        )
    });
    let effective_max = max.unwrap_or(settings.subscriber.reconnect_max_ms);
    if let Some(n) = base {
        if n <= effective_max {
            settings.subscriber.reconnect_base_ms = n;
        } else {
            tracing::warn!(
                key = "RELAY_RECONNECT_BASE_MS",
                value = n,
                max = effective_max,
                "reconnect base exceeds max, ignoring"
            );
        }
    }
    if let Some(n) = max {
        if n >= settings.subscriber.reconnect_base_ms {
            settings.subscriber.reconnect_max_ms = n;
        } else {
            tracing::warn!(
                key = "RELAY_RECONNECT_MAX_MS",
                value = n,
                base = settings.subscriber.reconnect_base_ms,
                "reconnect max below base, ignoring"
            );
        }
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = string("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = string("RELAY_LOG_JSON") {
        if let Some(b) = checked("RELAY_LOG_JSON", &v, parse_bool(&v)) {
            settings.logging.json = b;
        }
    }
}

fn checked<T>(key: &str, raw: &str, parsed: Option<T>) -> Option<T> {
    if parsed.is_none() {
        tracing::warn!(key, value = %raw, "invalid env var, ignoring");
    }
    parsed
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
