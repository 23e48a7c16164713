use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use hinge_core::{ChainId, Event, EventKind, SubscriptionId, WalletId};

use crate::bus::BusInner;

/// Failure reported by a subscriber.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<&str> for HandlerError {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for HandlerError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

pub type EventHandler = Arc<dyn Fn(&Event) -> Result<(), HandlerError> + Send + Sync>;
pub type AsyncEventHandler =
    Arc<dyn Fn(Event) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;
pub type Predicate = Arc<dyn Fn(&Event) -> bool + Send + Sync>;
pub type Transform = Arc<dyn Fn(Event) -> Event + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&DispatchError) + Send + Sync>;

/// What the global error handlers receive when a subscriber fails.
#[derive(Clone, Debug)]
pub struct DispatchError {
    pub subscription_id: SubscriptionId,
    pub event: Event,
    pub message: String,
    pub panicked: bool,
}

/// Filters and delivery flags for one subscription.
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    pub wallet_id: Option<WalletId>,
    pub chain_id: Option<ChainId>,
    pub predicate: Option<Predicate>,
    pub transform: Option<Transform>,
    pub once: bool,
    /// Higher runs first; ties keep subscription order.
    pub priority: i32,
}

impl SubscribeOptions {
    pub fn wallet(mut self, wallet_id: impl Into<WalletId>) -> Self {
        self.wallet_id = Some(wallet_id.into());
        self
    }

    pub fn chain(mut self, chain_id: impl Into<ChainId>) -> Self {
        self.chain_id = Some(chain_id.into());
        self
    }

    pub fn filter(mut self, predicate: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn transform(mut self, transform: impl Fn(Event) -> Event + Send + Sync + 'static) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("wallet_id", &self.wallet_id)
            .field("chain_id", &self.chain_id)
            .field("predicate", &self.predicate.is_some())
            .field("transform", &self.transform.is_some())
            .field("once", &self.once)
            .field("priority", &self.priority)
            .finish()
    }
}

pub(crate) enum Callback {
    Sync(EventHandler),
    Async(AsyncEventHandler),
}

pub(crate) struct Subscription {
    pub(crate) id: SubscriptionId,
    pub(crate) kind: EventKind,
    pub(crate) callback: Callback,
    pub(crate) options: SubscribeOptions,
    pub(crate) created_at: i64,
    invocation_count: AtomicU64,
    fired: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(kind: EventKind, callback: Callback, options: SubscribeOptions) -> Self {
        Self {
            id: SubscriptionId::new(),
            kind,
            callback,
            options,
            created_at: hinge_core::now_millis(),
            invocation_count: AtomicU64::new(0),
            fired: AtomicBool::new(false),
        }
    }

    pub(crate) fn matches(&self, event: &Event) -> bool {
        if let Some(wallet) = &self.options.wallet_id {
            if event.wallet_id.as_ref() != Some(wallet) {
                return false;
            }
        }
        if let Some(chain) = &self.options.chain_id {
            if event.chain_id.as_ref() != Some(chain) {
                return false;
            }
        }
        match &self.options.predicate {
            Some(predicate) => predicate(event),
            None => true,
        }
    }

    /// Claim the single delivery of a one-shot subscription. Always true for
    /// regular subscriptions.
    pub(crate) fn claim(&self) -> bool {
        !self.options.once || !self.fired.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn record_invocation(&self) {
        self.invocation_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id.clone(),
            kind: self.kind,
            priority: self.options.priority,
            once: self.options.once,
            created_at: self.created_at,
            invocation_count: self.invocation_count.load(Ordering::Relaxed),
        }
    }
}

/// Read-only view of a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub kind: EventKind,
    pub priority: i32,
    pub once: bool,
    pub created_at: i64,
    pub invocation_count: u64,
}

/// Cancellation handle returned by `subscribe`. Dropping it keeps the
/// subscription alive; call [`SubscriptionHandle::cancel`] to remove it.
#[derive(Clone, Debug)]
pub struct SubscriptionHandle {
    pub(crate) id: SubscriptionId,
    pub(crate) kind: EventKind,
    pub(crate) bus: Weak<BusInner>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Remove the subscription. Returns false if it was already gone.
    pub fn cancel(&self) -> bool {
        self.bus
            .upgrade()
            .is_some_and(|bus| bus.remove(self.kind, &self.id))
    }
}
