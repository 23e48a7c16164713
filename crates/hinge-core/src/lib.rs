//! Shared vocabulary for the hinge workspace: identifiers, the chain and
//! account model, the wallet adapter contract, the error taxonomy and the
//! event envelope published by every other crate.

pub mod account;
pub mod adapter;
pub mod chain;
pub mod errors;
pub mod events;
pub mod ids;

pub use account::Account;
pub use adapter::{
    AdapterEvent, ConnectOptions, ConnectionResult, Permissions, ProviderHandle, WalletAdapter,
};
pub use chain::{Chain, ChainFamily, ChainId};
pub use errors::{AdapterError, HingeError, Result};
pub use events::{Event, EventKind};
pub use ids::{SessionId, SubscriptionId, WalletId, WalletSessionId};

/// Milliseconds since the Unix epoch, the timestamp unit carried by events.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
