//! Connection lifecycle for wallet sessions: per-wallet state tracking,
//! serialized connect/disconnect, background recovery, health sweeps, and
//! the chain/account switch protocol.

pub mod context;
pub mod health;
pub mod lock;
pub mod manager;
pub mod mock;
pub mod recovery;
pub mod state;
pub mod switch;

pub use context::ClientContext;
pub use health::{HealthConfig, HealthMonitor, StaleSession};
pub use lock::WalletLocks;
pub use manager::ConnectionManager;
pub use mock::{MockAdapter, MockConnect};
pub use recovery::{recovery_delay, RecoveryOptions};
pub use state::{ConnectionRecord, ConnectionStateTracker, ConnectionStatus};
pub use switch::{SwitchOptions, SwitchProtocol};
