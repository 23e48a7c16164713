//! Settings type definitions.
//!
//! Field names are camelCase in JSON. Every section implements [`Default`] and
//! is `#[serde(default)]`, so partial files are accepted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for one hinge client.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HingeSettings {
    pub recovery: RecoverySettings,
    pub health: HealthSettings,
    pub events: EventSettings,
    pub session: SessionSettings,
    pub logging: LoggingSettings,
}

impl HingeSettings {
    /// Reject combinations the runtime cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.events.persist_history && self.events.history_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "events.historyCapacity must be > 0 when history is persisted".into(),
            ));
        }
        if self.events.replay_enabled && !self.events.persist_history {
            return Err(SettingsError::InvalidValue(
                "events.replayEnabled requires events.persistHistory".into(),
            ));
        }
        if self.health.enabled && self.health.interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "health.intervalMs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Delay policy between background reconnect attempts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryStrategy {
    Immediate,
    LinearBackoff,
    #[default]
    ExponentialBackoff,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecoverySettings {
    pub auto_reconnect: bool,
    pub strategy: RecoveryStrategy,
    /// Ceiling on connect attempts in one streak, the initial one included.
    pub max_reconnect_attempts: u32,
    /// Base delay fed to the strategy.
    pub reconnect_interval_ms: u64,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            strategy: RecoveryStrategy::ExponentialBackoff,
            max_reconnect_attempts: 3,
            reconnect_interval_ms: 1_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthSettings {
    pub enabled: bool,
    pub interval_ms: u64,
    /// Connected sessions idle longer than this are reported stale.
    pub stale_after_ms: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
            stale_after_ms: 5 * 60_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventSettings {
    /// Keep a bounded history of published events.
    pub persist_history: bool,
    pub history_capacity: usize,
    pub replay_enabled: bool,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            persist_history: false,
            history_capacity: 100,
            replay_enabled: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Lifetime of a session from creation; `None` never expires.
    pub ttl_ms: Option<u64>,
    /// SQLite file for session snapshots; in-memory only when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence_path: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl_ms: Some(24 * 60 * 60 * 1_000),
            persistence_path: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// Per-module overrides, e.g. `{"hinge_connect": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            modules: BTreeMap::new(),
        }
    }
}
