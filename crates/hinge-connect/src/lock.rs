use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use hinge_core::WalletId;

/// One FIFO async lock per wallet. Every lifecycle operation for a wallet
/// runs while holding its guard; different wallets never contend.
#[derive(Default)]
pub struct WalletLocks {
    locks: DashMap<WalletId, Arc<Mutex<()>>>,
}

impl WalletLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `wallet_id`. Waiters are served in
    /// arrival order.
    pub async fn acquire(&self, wallet_id: &WalletId) -> OwnedMutexGuard<()> {
        // Clone out of the map so no shard lock is held across the await.
        let lock = self.locks.entry(wallet_id.clone()).or_default().clone();
        lock.lock_owned().await
    }

    pub fn is_locked(&self, wallet_id: &WalletId) -> bool {
        self.locks
            .get(wallet_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Drop the lock entry once nobody holds or waits on it. Returns false
    /// while a guard or a queued waiter still shares the mutex, so later
    /// callers keep queueing behind them.
    pub fn remove(&self, wallet_id: &WalletId) -> bool {
        // `acquire` clones under the same shard lock, so the count is exact here.
        self.locks
            .remove_if(wallet_id, |_, lock| Arc::strong_count(lock) == 1)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
