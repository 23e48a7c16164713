#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use hinge_connect::{ClientContext, ConnectionManager, ConnectionStateTracker, MockAdapter, RecoveryOptions, SwitchProtocol};
use hinge_core::{Chain, Event, EventKind};
use hinge_events::{EventBus, EventBusConfig, SubscribeOptions};
use hinge_settings::RecoveryStrategy;
use hinge_store::SessionStore;

pub struct Harness {
    pub ctx: Arc<ClientContext>,
    pub manager: ConnectionManager,
    pub switch: SwitchProtocol,
    pub events: Arc<Mutex<Vec<Event>>>,
}

impl Harness {
    pub fn new(recovery: RecoveryOptions) -> Self {
        let bus = EventBus::new(EventBusConfig {
            persist_history: false,
            history_capacity: 0,
            replay_enabled: false,
        });
        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in EventKind::ALL {
            let sink = Arc::clone(&events);
            bus.subscribe(
                kind,
                move |e: &Event| {
                    sink.lock().push(e.clone());
                    Ok(())
                },
                SubscribeOptions::default(),
            );
        }

        let ctx = Arc::new(ClientContext::new(
            Arc::new(SessionStore::default()),
            ConnectionStateTracker::new(recovery),
            bus,
        ));
        Self {
            manager: ConnectionManager::new(Arc::clone(&ctx)),
            switch: SwitchProtocol::new(Arc::clone(&ctx)),
            ctx,
            events,
        }
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }

    pub fn of(&self, kind: EventKind) -> Vec<Event> {
        self.events.lock().iter().filter(|e| e.kind == kind).cloned().collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.of(kind).len()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }
}

pub fn no_recovery() -> RecoveryOptions {
    RecoveryOptions {
        auto_reconnect: false,
        ..RecoveryOptions::default()
    }
}

pub fn exponential(max_attempts: u32) -> RecoveryOptions {
    RecoveryOptions {
        auto_reconnect: true,
        strategy: RecoveryStrategy::ExponentialBackoff,
        max_attempts,
        interval: Duration::from_millis(1_000),
    }
}

pub fn ethereum() -> Chain {
    Chain::evm(1, "Ethereum")
}

pub fn polygon() -> Chain {
    Chain::evm(137, "Polygon")
}

pub fn wallet(id: &str) -> Arc<MockAdapter> {
    Arc::new(MockAdapter::new(id, ["0xAAA1", "0xBBB2"], ethereum()))
}
