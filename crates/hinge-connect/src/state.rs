use dashmap::DashMap;
use tracing::debug;

use hinge_core::{HingeError, Result, WalletId};
use hinge_settings::RecoveryStrategy;

use crate::recovery::RecoveryOptions;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }

    pub fn can_transition_to(self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, next),
            (Idle | Error | Disconnected, Connecting)
                | (Connecting, Connected | Error)
                | (Connected, Disconnecting | Error)
                | (Error, Disconnecting)
                | (Disconnecting, Disconnected)
        )
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection state of one wallet.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionRecord {
    pub wallet_id: WalletId,
    pub status: ConnectionStatus,
    /// Connect attempts in the current streak.
    pub attempts: u32,
    pub last_attempt_at: Option<i64>,
    pub last_connected_at: Option<i64>,
    pub last_error: Option<HingeError>,
    pub auto_reconnect: bool,
    pub reconnect_interval_ms: u64,
    pub max_attempts: u32,
    pub strategy: RecoveryStrategy,
}

impl ConnectionRecord {
    fn new(wallet_id: WalletId, options: &RecoveryOptions) -> Self {
        let mut record = Self {
            wallet_id,
            status: ConnectionStatus::Idle,
            attempts: 0,
            last_attempt_at: None,
            last_connected_at: None,
            last_error: None,
            auto_reconnect: false,
            reconnect_interval_ms: 0,
            max_attempts: 0,
            strategy: RecoveryStrategy::default(),
        };
        record.apply(options);
        record
    }

    fn apply(&mut self, options: &RecoveryOptions) {
        self.auto_reconnect = options.auto_reconnect;
        self.strategy = options.strategy;
        self.max_attempts = options.max_attempts;
        self.reconnect_interval_ms = u64::try_from(options.interval.as_millis()).unwrap_or(u64::MAX);
    }

    pub fn recovery_options(&self) -> RecoveryOptions {
        RecoveryOptions {
            auto_reconnect: self.auto_reconnect,
            strategy: self.strategy,
            max_attempts: self.max_attempts,
            interval: std::time::Duration::from_millis(self.reconnect_interval_ms),
        }
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Per-wallet connection records with validated transitions.
pub struct ConnectionStateTracker {
    records: DashMap<WalletId, ConnectionRecord>,
    defaults: RecoveryOptions,
}

impl ConnectionStateTracker {
    pub fn new(defaults: RecoveryOptions) -> Self {
        Self {
            records: DashMap::new(),
            defaults,
        }
    }

    pub fn defaults(&self) -> &RecoveryOptions {
        &self.defaults
    }

    pub fn get(&self, wallet_id: &WalletId) -> Option<ConnectionRecord> {
        self.records.get(wallet_id).map(|r| r.clone())
    }

    pub fn status(&self, wallet_id: &WalletId) -> Option<ConnectionStatus> {
        self.records.get(wallet_id).map(|r| r.status)
    }

    pub fn records(&self) -> Vec<ConnectionRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }

    pub fn wallets_in(&self, status: ConnectionStatus) -> Vec<WalletId> {
        self.records
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.key().clone())
            .collect()
    }

    /// Start a connect attempt: move to `connecting` and count it. A fresh
    /// streak resets the counter first.
    pub fn begin_attempt(&self, wallet_id: &WalletId, fresh_streak: bool) -> Result<ConnectionRecord> {
        let defaults = &self.defaults;
        let mut entry = self
            .records
            .entry(wallet_id.clone())
            .or_insert_with(|| ConnectionRecord::new(wallet_id.clone(), defaults));
        let record = entry.value_mut();
        check(record, ConnectionStatus::Connecting)?;

        record.status = ConnectionStatus::Connecting;
        if fresh_streak {
            record.attempts = 0;
        }
        record.attempts += 1;
        record.last_attempt_at = Some(hinge_core::now_millis());
        debug!(wallet_id = %wallet_id, attempt = record.attempts, "connect attempt started");
        Ok(record.clone())
    }

    /// Move to `status`. Entering `connected` clears the stored error.
    pub fn transition(&self, wallet_id: &WalletId, status: ConnectionStatus) -> Result<ConnectionRecord> {
        let mut entry = self
            .records
            .get_mut(wallet_id)
            .ok_or_else(|| HingeError::NotFound(format!("connection state for {wallet_id}")))?;
        let record = entry.value_mut();
        check(record, status)?;

        debug!(wallet_id = %wallet_id, from = %record.status, to = %status, "connection transition");
        record.status = status;
        if status == ConnectionStatus::Connected {
            record.last_connected_at = Some(hinge_core::now_millis());
            record.last_error = None;
        }
        Ok(record.clone())
    }

    /// Move to `error` and remember why.
    pub fn fail(&self, wallet_id: &WalletId, error: HingeError) -> Result<ConnectionRecord> {
        self.transition(wallet_id, ConnectionStatus::Error)?;
        self.set_error(wallet_id, error)
    }

    /// Store `error` without changing status.
    pub fn set_error(&self, wallet_id: &WalletId, error: HingeError) -> Result<ConnectionRecord> {
        self.modify(wallet_id, |r| r.last_error = Some(error))
    }

    /// Begin a new attempt streak without connecting, e.g. after the wallet
    /// dropped an established connection.
    pub fn reset_attempts(&self, wallet_id: &WalletId) -> Result<ConnectionRecord> {
        self.modify(wallet_id, |r| r.attempts = 0)
    }

    /// Replace the recovery policy of one wallet, creating its record if needed.
    pub fn configure(&self, wallet_id: &WalletId, options: &RecoveryOptions) -> ConnectionRecord {
        let mut entry = self
            .records
            .entry(wallet_id.clone())
            .or_insert_with(|| ConnectionRecord::new(wallet_id.clone(), options));
        entry.value_mut().apply(options);
        entry.value().clone()
    }

    pub fn remove(&self, wallet_id: &WalletId) -> Option<ConnectionRecord> {
        self.records.remove(wallet_id).map(|(_, r)| r)
    }

    fn modify(&self, wallet_id: &WalletId, apply: impl FnOnce(&mut ConnectionRecord)) -> Result<ConnectionRecord> {
        let mut entry = self
            .records
            .get_mut(wallet_id)
            .ok_or_else(|| HingeError::NotFound(format!("connection state for {wallet_id}")))?;
        apply(entry.value_mut());
        Ok(entry.value().clone())
    }
}

impl Default for ConnectionStateTracker {
    fn default() -> Self {
        Self::new(RecoveryOptions::default())
    }
}

fn check(record: &ConnectionRecord, next: ConnectionStatus) -> Result<()> {
    if record.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(HingeError::InvalidTransition {
            wallet_id: record.wallet_id.to_string(),
            from: record.status.as_str(),
            to: next.as_str(),
        })
    }
}
