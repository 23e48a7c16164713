//! Contract every wallet adapter (browser extension, hardware device,
//! remote signer) satisfies. Implementations live outside this workspace.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::account::Account;
use crate::chain::{Chain, ChainId};
use crate::errors::AdapterError;
use crate::ids::WalletId;

/// Opaque reference to the chain-specific communication channel. Owned by the
/// adapter, borrowed by sessions; never inspected or serialized here.
#[derive(Clone)]
pub struct ProviderHandle(Arc<dyn Any + Send + Sync>);

impl ProviderHandle {
    pub fn new<T: Any + Send + Sync>(provider: T) -> Self {
        Self(Arc::new(provider))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProviderHandle(..)")
    }
}

/// Two handles are equal when they point at the same provider.
impl PartialEq for ProviderHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ProviderHandle {}

/// What a session is allowed to do through its provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    /// RPC-style method names, e.g. `eth_sendTransaction`.
    pub methods: Vec<String>,
    pub events: Vec<String>,
    /// Per-chain or per-wallet extension fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default)]
pub struct ConnectOptions {
    /// Chain to request during connect; the wallet's current chain otherwise.
    pub chain: Option<Chain>,
    /// Only reconnect to an already trusted site, never prompt.
    pub silent: bool,
    /// Give up on the wallet after this long; the attempt fails with
    /// `AdapterError::Timeout` and takes the normal failure path.
    pub timeout: Option<Duration>,
}

impl ConnectOptions {
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }
}

/// Everything an adapter hands back from a successful connect.
#[derive(Clone, Debug)]
pub struct ConnectionResult {
    pub accounts: Vec<Account>,
    pub chain: Chain,
    pub provider: Option<ProviderHandle>,
    pub permissions: Permissions,
}

/// Notifications an adapter pushes on its own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdapterEvent {
    ConnectionLost { reason: String },
    AccountsChanged { addresses: Vec<String> },
    ChainChanged { chain_id: ChainId },
}

impl AdapterEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionLost { .. } => "connection:lost",
            Self::AccountsChanged { .. } => "accounts:changed",
            Self::ChainChanged { .. } => "chain:changed",
        }
    }
}

#[async_trait]
pub trait WalletAdapter: Send + Sync {
    fn wallet_id(&self) -> &WalletId;

    async fn connect(&self, options: &ConnectOptions) -> Result<ConnectionResult, AdapterError>;

    async fn disconnect(&self) -> Result<(), AdapterError>;

    /// Ask the provider to move to `chain`.
    async fn switch_chain(&self, chain: &Chain) -> Result<(), AdapterError> {
        Err(AdapterError::Unsupported(format!(
            "{} cannot switch to {}",
            self.wallet_id(),
            chain.id
        )))
    }

    /// Register `chain` with the wallet (EVM `wallet_addEthereumChain`).
    async fn add_chain(&self, chain: &Chain) -> Result<(), AdapterError> {
        Err(AdapterError::Unsupported(format!(
            "{} cannot add {}",
            self.wallet_id(),
            chain.id
        )))
    }

    /// Stream of adapter-originated notifications, if the wallet emits any.
    fn subscribe(&self) -> Option<broadcast::Receiver<AdapterEvent>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct FakeProvider(u8);

    #[test]
    fn provider_handle_equality_is_identity() {
        let a = ProviderHandle::new(FakeProvider(1));
        let b = a.clone();
        let c = ProviderHandle::new(FakeProvider(1));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.downcast_ref::<FakeProvider>(), Some(&FakeProvider(1)));
        assert!(a.downcast_ref::<String>().is_none());
    }

    #[test]
    fn adapter_event_names() {
        let lost = AdapterEvent::ConnectionLost { reason: "tab closed".into() };
        assert_eq!(lost.name(), "connection:lost");
        let chain = AdapterEvent::ChainChanged { chain_id: ChainId::from("eip155:1") };
        assert_eq!(chain.name(), "chain:changed");
    }

    struct Minimal(WalletId);

    #[async_trait]
    impl WalletAdapter for Minimal {
        fn wallet_id(&self) -> &WalletId {
            &self.0
        }
        async fn connect(&self, _options: &ConnectOptions) -> Result<ConnectionResult, AdapterError> {
            Err(AdapterError::Unavailable("not installed".into()))
        }
        async fn disconnect(&self) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn default_switch_is_unsupported() {
        let adapter = Minimal(WalletId::from("minimal"));
        let err = adapter.switch_chain(&Chain::evm(1, "Ethereum")).await.unwrap_err();
        assert!(matches!(err, AdapterError::Unsupported(_)));
        assert!(adapter.subscribe().is_none());
    }
}
