use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use hinge_core::{Event, EventKind, SubscriptionId};
use hinge_settings::EventSettings;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::subscription::{
    AsyncEventHandler, Callback, DispatchError, ErrorHandler, HandlerError, SubscribeOptions, Subscription,
    SubscriptionHandle, SubscriptionInfo,
};

const TAP_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub struct EventBusConfig {
    /// Keep published events in a ring buffer.
    pub persist_history: bool,
    pub history_capacity: usize,
    pub replay_enabled: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self::from(&EventSettings::default())
    }
}

impl From<&EventSettings> for EventBusConfig {
    fn from(settings: &EventSettings) -> Self {
        Self {
            persist_history: settings.persist_history,
            history_capacity: settings.history_capacity,
            replay_enabled: settings.replay_enabled,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ReplayOptions {
    /// Only events stamped at or after this time (ms).
    pub since: Option<i64>,
    /// Only the most recent `limit` matching events.
    pub limit: Option<usize>,
}

pub(crate) struct BusInner {
    config: EventBusConfig,
    /// Per kind, sorted by priority descending, stable for ties.
    subscribers: RwLock<HashMap<EventKind, Vec<Arc<Subscription>>>>,
    history: Mutex<VecDeque<Event>>,
    error_handlers: RwLock<Vec<ErrorHandler>>,
    tap: broadcast::Sender<Event>,
}

impl BusInner {
    pub(crate) fn remove(&self, kind: EventKind, id: &SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let Some(list) = subscribers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| &s.id != id);
        before != list.len()
    }
}

/// The event dispatch engine. Cheap to clone; clones share subscribers and history.
///
/// Dispatch is synchronous: [`EventBus::publish`] returns once every matching
/// synchronous handler ran. Async handlers are spawned and not awaited.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let (tap, _) = broadcast::channel(TAP_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                config,
                subscribers: RwLock::new(HashMap::new()),
                history: Mutex::new(VecDeque::new()),
                error_handlers: RwLock::new(Vec::new()),
                tap,
            }),
        }
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.inner.config
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F, options: SubscribeOptions) -> SubscriptionHandle
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.insert(kind, Callback::Sync(Arc::new(handler)), options)
    }

    /// Subscribe a handler whose work completes later. Each delivery is
    /// spawned on the current tokio runtime; an `Err` it resolves to is
    /// routed to the error handlers like a synchronous failure.
    pub fn subscribe_async<F, Fut>(
        &self,
        kind: EventKind,
        handler: F,
        options: SubscribeOptions,
    ) -> SubscriptionHandle
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let handler: AsyncEventHandler = Arc::new(move |event: Event| handler(event).boxed());
        self.insert(kind, Callback::Async(handler), options)
    }

    fn insert(&self, kind: EventKind, callback: Callback, options: SubscribeOptions) -> SubscriptionHandle {
        let subscription = Arc::new(Subscription::new(kind, callback, options));
        let id = subscription.id.clone();
        let priority = subscription.options.priority;

        {
            let mut subscribers = self.inner.subscribers.write();
            let list = subscribers.entry(kind).or_default();
            // After every existing entry with priority >= ours keeps ties in order.
            let pos = list
                .iter()
                .position(|s| s.options.priority < priority)
                .unwrap_or(list.len());
            list.insert(pos, subscription);
        }

        debug!(event = %kind, subscription_id = %id, priority, "subscribed");
        SubscriptionHandle {
            id,
            kind,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.inner.remove(handle.kind, &handle.id)
    }

    /// Register a global handler for subscriber failures.
    pub fn on_error(&self, handler: impl Fn(&DispatchError) + Send + Sync + 'static) {
        self.inner.error_handlers.write().push(Arc::new(handler));
    }

    /// Receiver that sees every published event after stamping, in publish order.
    pub fn tap(&self) -> broadcast::Receiver<Event> {
        self.inner.tap.subscribe()
    }

    /// Publish an event. Returns the number of handlers invoked.
    pub fn publish(&self, mut event: Event) -> usize {
        if event.timestamp.is_none() {
            event.timestamp = Some(hinge_core::now_millis());
        }

        if self.inner.config.persist_history && self.inner.config.history_capacity > 0 {
            let mut history = self.inner.history.lock();
            history.push_back(event.clone());
            while history.len() > self.inner.config.history_capacity {
                history.pop_front();
            }
        }

        let _ = self.inner.tap.send(event.clone());

        // Snapshot so handlers may (un)subscribe without disturbing this pass.
        let snapshot: Vec<Arc<Subscription>> = self
            .inner
            .subscribers
            .read()
            .get(&event.kind)
            .cloned()
            .unwrap_or_default();

        let mut invoked = 0;
        for subscription in snapshot {
            if !subscription.matches(&event) || !subscription.claim() {
                continue;
            }

            let payload = match &subscription.options.transform {
                Some(transform) => transform(event.clone()),
                None => event.clone(),
            };

            subscription.record_invocation();
            invoked += 1;

            match &subscription.callback {
                Callback::Sync(handler) => {
                    match std::panic::catch_unwind(AssertUnwindSafe(|| handler(&payload))) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => self.report_failure(&subscription.id, &event, e.0, false),
                        Err(panic) => {
                            self.report_failure(&subscription.id, &event, panic_message(&*panic), true)
                        }
                    }
                }
                Callback::Async(handler) => self.spawn_async(&subscription.id, handler(payload), &event),
            }

            if subscription.options.once {
                self.inner.remove(subscription.kind, &subscription.id);
            }
        }
        invoked
    }

    fn spawn_async(
        &self,
        subscription_id: &SubscriptionId,
        future: futures::future::BoxFuture<'static, Result<(), HandlerError>>,
        event: &Event,
    ) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(event = %event.kind, "async handler skipped: no tokio runtime");
            return;
        };
        let bus = Arc::downgrade(&self.inner);
        let subscription_id = subscription_id.clone();
        let event = event.clone();
        runtime.spawn(async move {
            let (message, panicked) = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => (e.0, false),
                Err(panic) => (panic_message(&*panic), true),
            };
            if let Some(inner) = Weak::upgrade(&bus) {
                EventBus { inner }.report_failure(&subscription_id, &event, message, panicked);
            }
        });
    }

    fn report_failure(&self, subscription_id: &SubscriptionId, event: &Event, message: String, panicked: bool) {
        warn!(
            event = %event.kind,
            subscription_id = %subscription_id,
            panicked,
            error = %message,
            "event handler failed"
        );

        let failure = DispatchError {
            subscription_id: subscription_id.clone(),
            event: event.clone(),
            message: message.clone(),
            panicked,
        };
        let handlers: Vec<ErrorHandler> = self.inner.error_handlers.read().clone();
        for handler in handlers {
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(&failure))).is_err() {
                warn!("error handler panicked");
            }
        }

        // Failures while handling `error` itself are not re-published.
        if event.kind != EventKind::Error {
            let mut error_event = Event::new(EventKind::Error).data(serde_json::json!({
                "source": event.kind.as_str(),
                "subscriptionId": subscription_id.as_str(),
                "message": message,
            }));
            error_event.wallet_id = event.wallet_id.clone();
            error_event.session_id = event.session_id.clone();
            self.publish(error_event);
        }
    }

    /// Feed stored history for `kind` to `handler`, oldest first.
    pub fn replay(&self, kind: EventKind, handler: impl Fn(&Event), options: ReplayOptions) -> usize {
        if !self.inner.config.replay_enabled {
            warn!(event = %kind, "replay requested but disabled");
            return 0;
        }

        let matching: Vec<Event> = self
            .inner
            .history
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .filter(|e| options.since.map_or(true, |since| e.timestamp_ms() >= since))
            .cloned()
            .collect();

        let skip = options
            .limit
            .map_or(0, |limit| matching.len().saturating_sub(limit));
        let mut replayed = 0;
        for event in matching.iter().skip(skip) {
            handler(event);
            replayed += 1;
        }
        replayed
    }

    /// Stored events, optionally restricted to one kind, oldest first.
    pub fn history(&self, kind: Option<EventKind>) -> Vec<Event> {
        self.inner
            .history
            .lock()
            .iter()
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .cloned()
            .collect()
    }

    pub fn clear_history(&self) {
        self.inner.history.lock().clear();
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner.subscribers.read().get(&kind).map_or(0, Vec::len)
    }

    pub fn subscriptions(&self, kind: EventKind) -> Vec<SubscriptionInfo> {
        self.inner
            .subscribers
            .read()
            .get(&kind)
            .map(|list| list.iter().map(|s| s.info()).collect())
            .unwrap_or_default()
    }

    /// Drop every subscription (error handlers stay registered).
    pub fn clear(&self) {
        self.inner.subscribers.write().clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
