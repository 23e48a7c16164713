//! Resolve [`HingeSettings`]: compiled defaults, then the user's JSON file
//! merged key by key, then `HINGE_*` environment overrides, then validation.
//! A `null` in the file keeps the default; arrays replace wholesale.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{HingeSettings, RecoveryStrategy};

/// Resolve the path to the settings file (`~/.hinge/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".hinge").join("settings.json")
}

/// [`load_settings_from_path`] on [`settings_path`].
pub fn load_settings() -> Result<HingeSettings> {
    load_settings_from_path(&settings_path())
}

/// Defaults, file at `path`, env overrides, validation.
///
/// A missing file yields defaults; invalid JSON or an invalid combination of
/// values is an error.
pub fn load_settings_from_path(path: &Path) -> Result<HingeSettings> {
    let defaults = serde_json::to_value(HingeSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: HingeSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

/// Overlay `source` on `target`; objects merge per key, anything else is replaced.
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

/// Apply `HINGE_*` overrides read through `lookup`.
///
/// Invalid values are ignored with a warning and the file/default value kept.
pub fn apply_overrides<F>(settings: &mut HingeSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Recovery ────────────────────────────────────────────────────
    if let Some(v) = env.bool("HINGE_AUTO_RECONNECT") {
        settings.recovery.auto_reconnect = v;
    }
    if let Some(v) = env.u64_range("HINGE_MAX_RECONNECT_ATTEMPTS", 1, 100) {
        settings.recovery.max_reconnect_attempts = v as u32;
    }
    if let Some(v) = env.u64_range("HINGE_RECONNECT_INTERVAL_MS", 0, 600_000) {
        settings.recovery.reconnect_interval_ms = v;
    }
    if let Some(v) = env.string("HINGE_RECOVERY_STRATEGY") {
        match serde_json::from_value::<RecoveryStrategy>(Value::String(v.clone())) {
            Ok(strategy) => settings.recovery.strategy = strategy,
            Err(_) => warn!(key = "HINGE_RECOVERY_STRATEGY", value = %v, "unknown strategy, ignoring"),
        }
    }

    // ── Health ──────────────────────────────────────────────────────
    if let Some(v) = env.bool("HINGE_HEALTH_ENABLED") {
        settings.health.enabled = v;
    }
    if let Some(v) = env.u64_range("HINGE_HEALTH_INTERVAL_MS", 100, 3_600_000) {
        settings.health.interval_ms = v;
    }
    if let Some(v) = env.u64_range("HINGE_STALE_AFTER_MS", 1_000, 86_400_000) {
        settings.health.stale_after_ms = v;
    }

    // ── Events ──────────────────────────────────────────────────────
    if let Some(v) = env.bool("HINGE_EVENT_HISTORY") {
        settings.events.persist_history = v;
    }
    if let Some(v) = env.u64_range("HINGE_EVENT_HISTORY_CAPACITY", 1, 100_000) {
        settings.events.history_capacity = v as usize;
    }
    if let Some(v) = env.bool("HINGE_EVENT_REPLAY") {
        settings.events.replay_enabled = v;
    }

    // ── Session ─────────────────────────────────────────────────────
    if let Some(v) = env.u64_range("HINGE_SESSION_TTL_MS", 1_000, u64::MAX) {
        settings.session.ttl_ms = Some(v);
    }
    if let Some(v) = env.string("HINGE_SESSION_DB") {
        settings.session.persistence_path = Some(v);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("HINGE_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64_range(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }
}
