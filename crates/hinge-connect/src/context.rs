use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use hinge_core::{Event, EventKind, WalletAdapter, WalletId};
use hinge_events::EventBus;
use hinge_store::SessionStore;

use crate::lock::WalletLocks;
use crate::state::ConnectionStateTracker;

/// A background task owned by the context, stoppable through its token.
struct TaskSlot {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Everything one client instance shares between its coordinator, switch
/// protocol and health monitor. Nothing here is process-global.
pub struct ClientContext {
    store: Arc<SessionStore>,
    tracker: ConnectionStateTracker,
    locks: WalletLocks,
    bus: EventBus,
    adapters: DashMap<WalletId, Arc<dyn WalletAdapter>>,
    recovery_tasks: DashMap<WalletId, TaskSlot>,
    monitor_tasks: DashMap<WalletId, TaskSlot>,
    generation: AtomicU64,
    shutdown: CancellationToken,
}

impl ClientContext {
    pub fn new(store: Arc<SessionStore>, tracker: ConnectionStateTracker, bus: EventBus) -> Self {
        Self {
            store,
            tracker,
            locks: WalletLocks::new(),
            bus,
            adapters: DashMap::new(),
            recovery_tasks: DashMap::new(),
            monitor_tasks: DashMap::new(),
            generation: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn tracker(&self) -> &ConnectionStateTracker {
        &self.tracker
    }

    pub fn locks(&self) -> &WalletLocks {
        &self.locks
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Publish `kind` for `wallet_id` with `data`.
    pub(crate) fn emit(&self, kind: EventKind, wallet_id: &WalletId, data: serde_json::Value) -> Event {
        let event = Event::new(kind).wallet(wallet_id).data(data);
        self.bus.publish(event.clone());
        event
    }

    pub fn register_adapter(&self, adapter: Arc<dyn WalletAdapter>) {
        self.adapters.insert(adapter.wallet_id().clone(), adapter);
    }

    pub fn adapter(&self, wallet_id: &WalletId) -> Option<Arc<dyn WalletAdapter>> {
        self.adapters.get(wallet_id).map(|a| Arc::clone(a.value()))
    }

    pub(crate) fn remove_adapter(&self, wallet_id: &WalletId) -> bool {
        self.adapters.remove(wallet_id).is_some()
    }

    /// Token cancelled by [`ClientContext::shutdown`]; every background task
    /// runs under a child of it.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn has_recovery(&self, wallet_id: &WalletId) -> bool {
        self.recovery_tasks
            .get(wallet_id)
            .is_some_and(|slot| !slot.handle.is_finished())
    }

    pub(crate) fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn set_recovery(&self, wallet_id: &WalletId, generation: u64, cancel: CancellationToken, handle: JoinHandle<()>) {
        let slot = TaskSlot { generation, cancel, handle };
        if let Some(old) = self.recovery_tasks.insert(wallet_id.clone(), slot) {
            old.cancel.cancel();
        }
    }

    /// Cancel the wallet's recovery task. Returns whether one was pending.
    pub(crate) fn cancel_recovery(&self, wallet_id: &WalletId) -> bool {
        match self.recovery_tasks.remove(wallet_id) {
            Some((_, slot)) => {
                slot.cancel.cancel();
                !slot.handle.is_finished()
            }
            None => false,
        }
    }

    /// Called by a recovery task on exit; leaves a newer task's slot alone.
    pub(crate) fn clear_recovery(&self, wallet_id: &WalletId, generation: u64) {
        self.recovery_tasks
            .remove_if(wallet_id, |_, slot| slot.generation == generation);
    }

    pub(crate) fn set_monitor(&self, wallet_id: &WalletId, generation: u64, cancel: CancellationToken, handle: JoinHandle<()>) {
        let slot = TaskSlot { generation, cancel, handle };
        if let Some(old) = self.monitor_tasks.insert(wallet_id.clone(), slot) {
            old.cancel.cancel();
        }
    }

    pub(crate) fn cancel_monitor(&self, wallet_id: &WalletId) -> bool {
        match self.monitor_tasks.remove(wallet_id) {
            Some((_, slot)) => {
                slot.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear_monitor(&self, wallet_id: &WalletId, generation: u64) {
        self.monitor_tasks
            .remove_if(wallet_id, |_, slot| slot.generation == generation);
    }

    pub fn has_monitor(&self, wallet_id: &WalletId) -> bool {
        self.monitor_tasks.contains_key(wallet_id)
    }

    /// Cancel every background task. The context stays readable afterwards.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for slot in self.recovery_tasks.iter() {
            slot.cancel.cancel();
        }
        for slot in self.monitor_tasks.iter() {
            slot.cancel.cancel();
        }
        self.recovery_tasks.clear();
        self.monitor_tasks.clear();
    }
}
