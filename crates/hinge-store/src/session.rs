use serde::{Deserialize, Serialize};

use hinge_core::account::same_address;
use hinge_core::{
    Account, Chain, ChainId, Permissions, ProviderHandle, SessionId, WalletId, WalletSessionId,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    Connecting,
    Connected,
    Switching,
    Disconnecting,
    Disconnected,
    Error,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Switching => "switching",
            Self::Disconnecting => "disconnecting",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }

    /// Anything but `disconnected` still holds a provider binding.
    pub fn is_live(self) -> bool {
        self != Self::Disconnected
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(Self::Initializing),
            "connecting" => Ok(Self::Connecting),
            "connected" => Ok(Self::Connected),
            "switching" => Ok(Self::Switching),
            "disconnecting" => Ok(Self::Disconnecting),
            "disconnected" => Ok(Self::Disconnected),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchKind {
    Chain,
    Account,
}

/// One chain or account switch, successful or not.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchRecord {
    pub kind: SwitchKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_chain: Option<ChainId>,
    pub to_chain: ChainId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_account: Option<String>,
    pub timestamp: i64,
    /// Caller-supplied trigger, e.g. `user`, `dapp-request`.
    pub reason: String,
    pub success: bool,
    /// No earlier record in the lineage targeted this chain.
    pub is_new_chain: bool,
}

impl SwitchRecord {
    pub fn chain(from: Option<&ChainId>, to: &ChainId, reason: impl Into<String>) -> Self {
        Self {
            kind: SwitchKind::Chain,
            from_chain: from.cloned(),
            to_chain: to.clone(),
            from_account: None,
            to_account: None,
            timestamp: hinge_core::now_millis(),
            reason: reason.into(),
            success: true,
            is_new_chain: false,
        }
    }

    pub fn account(chain: &ChainId, from: &str, to: &str, reason: impl Into<String>) -> Self {
        Self {
            kind: SwitchKind::Account,
            from_chain: Some(chain.clone()),
            to_chain: chain.clone(),
            from_account: Some(from.to_string()),
            to_account: Some(to.to_string()),
            timestamp: hinge_core::now_millis(),
            reason: reason.into(),
            success: true,
            is_new_chain: false,
        }
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}

/// One authenticated binding between a wallet and a chain.
///
/// Sessions are values: the store hands out clones and a chain or account
/// switch produces a new session linked through `previous_session_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub wallet_id: WalletId,
    /// 1 for a fresh connect, previous + 1 for a switch-derived session.
    pub version: u64,
    pub status: SessionStatus,
    pub accounts: Vec<Account>,
    pub chain: Chain,
    #[serde(skip)]
    pub provider: Option<ProviderHandle>,
    pub permissions: Permissions,
    pub created_at: i64,
    pub last_active_at: i64,
    pub last_accessed_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    pub operation_count: u64,
    pub active_time_ms: i64,
    #[serde(default)]
    pub switch_history: Vec<SwitchRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_session_id: Option<WalletSessionId>,
}

impl Session {
    pub fn active_account(&self) -> Option<&Account> {
        self.accounts.iter().find(|a| a.is_active)
    }

    pub fn find_account(&self, address: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| same_address(&a.address, address))
    }

    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether any earlier record in this lineage already moved to `chain`.
    pub fn has_visited(&self, chain: &ChainId) -> bool {
        self.switch_history.iter().any(|r| &r.to_chain == chain)
    }
}

/// Input to [`crate::SessionStore::create_session`].
#[derive(Clone, Debug)]
pub struct CreateSessionParams {
    /// Generated when absent.
    pub id: Option<SessionId>,
    pub wallet_id: WalletId,
    pub accounts: Vec<Account>,
    pub chain: Chain,
    pub provider: Option<ProviderHandle>,
    pub permissions: Permissions,
    /// Session this one was derived from by a switch. Sets `version` and
    /// the creation time floor.
    pub previous_session_id: Option<SessionId>,
    pub switch_history: Vec<SwitchRecord>,
}

impl CreateSessionParams {
    pub fn new(wallet_id: WalletId, accounts: Vec<Account>, chain: Chain) -> Self {
        Self {
            id: None,
            wallet_id,
            accounts,
            chain,
            provider: None,
            permissions: Permissions::default(),
            previous_session_id: None,
            switch_history: Vec::new(),
        }
    }

    pub fn with_provider(mut self, provider: Option<ProviderHandle>) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    /// Carry everything but the chain and accounts over from `previous`.
    pub fn derived_from(previous: &Session, accounts: Vec<Account>, chain: Chain) -> Self {
        Self {
            id: None,
            wallet_id: previous.wallet_id.clone(),
            accounts,
            chain,
            provider: previous.provider.clone(),
            permissions: previous.permissions.clone(),
            previous_session_id: Some(previous.id.clone()),
            switch_history: previous.switch_history.clone(),
        }
    }
}

/// Multi-chain context for one wallet: every session it produced, in order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSession {
    pub id: WalletSessionId,
    pub wallet_id: WalletId,
    pub session_ids: Vec<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_session_id: Option<SessionId>,
    #[serde(default)]
    pub switch_history: Vec<SwitchRecord>,
    pub created_at: i64,
}
