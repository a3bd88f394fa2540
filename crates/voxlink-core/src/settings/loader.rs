//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use super::types::Settings;
use super::{Result, SettingsError};

const ATTRIBUTE_WAIT_MS: (u64, u64) = (1, 1_000);
const ATTRIBUTE_RETRY_MS: (u64, u64) = (0, 1_000);
const SWEEP_EVERY: (u64, u64) = (1, 1_000_000);
const CAPACITY: (u64, u64) = (1, 1_000_000);

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<Settings> {
    let defaults = serde_json::to_value(Settings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: Settings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate_settings(&settings)?;
    Ok(settings)
}

/// Reject numeric settings outside the ranges the session engines support.
pub fn validate_settings(settings: &Settings) -> Result<()> {
    let identity = &settings.identity;
    let dispatch = &settings.dispatch;
    check_range("identity.attributeWaitMs", identity.attribute_wait_ms, ATTRIBUTE_WAIT_MS)?;
    check_range("identity.attributeRetryMs", identity.attribute_retry_ms, ATTRIBUTE_RETRY_MS)?;
    check_range("identity.sweepEvery", identity.sweep_every, SWEEP_EVERY)?;
    check_range("dispatch.queueCapacity", dispatch.queue_capacity as u64, CAPACITY)?;
    check_range("dispatch.eventCapacity", dispatch.event_capacity as u64, CAPACITY)?;
    Ok(())
}

fn check_range(key: &str, value: u64, (min, max): (u64, u64)) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(SettingsError::InvalidValue(format!(
            "{key} = {value} is outside {min}..={max}"
        )))
    }
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

/// Apply `VOXLINK_*` environment overrides. Invalid values are ignored.
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Some(v) = read_env_u64("VOXLINK_ATTRIBUTE_WAIT_MS", ATTRIBUTE_WAIT_MS) {
        settings.identity.attribute_wait_ms = v;
    }
    if let Some(v) = read_env_u64("VOXLINK_SWEEP_EVERY", SWEEP_EVERY) {
        settings.identity.sweep_every = v;
    }
    if let Some(v) = read_env_u64("VOXLINK_QUEUE_CAPACITY", CAPACITY) {
        settings.dispatch.queue_capacity = v as usize;
    }
    if let Some(v) = read_env_string("VOXLINK_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("VOXLINK_LOG_JSON") {
        settings.logging.json = v;
    }
}

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

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, (min, max): (u64, u64)) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
    }
    result
}
