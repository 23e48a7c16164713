use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::chain::ChainId;
use crate::ids::{SessionId, WalletId};

/// Stable event names published by the lifecycle subsystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "connection:initiated")]
    ConnectionInitiated,
    #[serde(rename = "connection:establishing")]
    ConnectionEstablishing,
    #[serde(rename = "connection:established")]
    ConnectionEstablished,
    #[serde(rename = "connection:failed")]
    ConnectionFailed,
    #[serde(rename = "connection:lost")]
    ConnectionLost,
    #[serde(rename = "connection:restored")]
    ConnectionRestored,

    #[serde(rename = "session:created")]
    SessionCreated,
    #[serde(rename = "session:updated")]
    SessionUpdated,
    #[serde(rename = "session:status-changed")]
    SessionStatusChanged,
    #[serde(rename = "session:ended")]
    SessionEnded,
    #[serde(rename = "session:expired")]
    SessionExpired,
    #[serde(rename = "session:error")]
    SessionError,

    #[serde(rename = "chain:switching")]
    ChainSwitching,
    #[serde(rename = "chain:switched")]
    ChainSwitched,
    #[serde(rename = "chain:switch-failed")]
    ChainSwitchFailed,
    #[serde(rename = "chain:added")]
    ChainAdded,

    /// Wallet reported a different account set on its own.
    #[serde(rename = "accounts:changed")]
    AccountsChanged,
    /// Wallet moved to another chain on its own.
    #[serde(rename = "chain:changed")]
    ChainChanged,

    #[serde(rename = "recovery:scheduled")]
    RecoveryScheduled,
    #[serde(rename = "recovery_failed")]
    RecoveryFailed,
    #[serde(rename = "health:stale")]
    HealthStale,

    /// A subscriber failed while handling another event.
    #[serde(rename = "error")]
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 22] = [
        Self::ConnectionInitiated,
        Self::ConnectionEstablishing,
        Self::ConnectionEstablished,
        Self::ConnectionFailed,
        Self::ConnectionLost,
        Self::ConnectionRestored,
        Self::SessionCreated,
        Self::SessionUpdated,
        Self::SessionStatusChanged,
        Self::SessionEnded,
        Self::SessionExpired,
        Self::SessionError,
        Self::ChainSwitching,
        Self::ChainSwitched,
        Self::ChainSwitchFailed,
        Self::ChainAdded,
        Self::AccountsChanged,
        Self::ChainChanged,
        Self::RecoveryScheduled,
        Self::RecoveryFailed,
        Self::HealthStale,
        Self::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionInitiated => "connection:initiated",
            Self::ConnectionEstablishing => "connection:establishing",
            Self::ConnectionEstablished => "connection:established",
            Self::ConnectionFailed => "connection:failed",
            Self::ConnectionLost => "connection:lost",
            Self::ConnectionRestored => "connection:restored",
            Self::SessionCreated => "session:created",
            Self::SessionUpdated => "session:updated",
            Self::SessionStatusChanged => "session:status-changed",
            Self::SessionEnded => "session:ended",
            Self::SessionExpired => "session:expired",
            Self::SessionError => "session:error",
            Self::ChainSwitching => "chain:switching",
            Self::ChainSwitched => "chain:switched",
            Self::ChainSwitchFailed => "chain:switch-failed",
            Self::ChainAdded => "chain:added",
            Self::AccountsChanged => "accounts:changed",
            Self::ChainChanged => "chain:changed",
            Self::RecoveryScheduled => "recovery:scheduled",
            Self::RecoveryFailed => "recovery_failed",
            Self::HealthStale => "health:stale",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown event: {s}"))
    }
}

/// Envelope for everything that goes through the event bus.
///
/// `timestamp` is filled in by the bus at publish time when the producer left
/// it empty, so every delivered event carries one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<WalletId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<ChainId>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: None,
            wallet_id: None,
            session_id: None,
            chain_id: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn wallet(mut self, wallet_id: &WalletId) -> Self {
        self.wallet_id = Some(wallet_id.clone());
        self
    }

    pub fn session(mut self, session_id: &SessionId) -> Self {
        self.session_id = Some(session_id.clone());
        self
    }

    pub fn chain(mut self, chain_id: &ChainId) -> Self {
        self.chain_id = Some(chain_id.clone());
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn at(mut self, timestamp_ms: i64) -> Self {
        self.timestamp = Some(timestamp_ms);
        self
    }

    /// Timestamp in ms, zero if the event was never published.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.unwrap_or_default()
    }
}
