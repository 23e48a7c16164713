//! Scripted wallet adapter for deterministic tests without a real wallet.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use hinge_core::{
    Account, AdapterError, AdapterEvent, Chain, ConnectOptions, ConnectionResult, Permissions,
    ProviderHandle, WalletAdapter, WalletId,
};

/// Pre-programmed outcome of one `connect` call.
#[derive(Clone, Debug)]
pub enum MockConnect {
    /// Connect with these accounts on this chain.
    Succeed { accounts: Vec<Account>, chain: Chain },
    Fail(AdapterError),
    /// Wait, then resolve as the inner outcome.
    Delay(Duration, Box<MockConnect>),
}

impl MockConnect {
    pub fn delayed(delay: Duration, inner: MockConnect) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Adapter that answers from scripts and counts what it was asked.
///
/// Each operation pops its next scripted outcome and falls back to the
/// default once the script runs dry. `max_in_flight` records the highest
/// number of operations observed running at the same time.
pub struct MockAdapter {
    wallet_id: WalletId,
    connect_script: Mutex<VecDeque<MockConnect>>,
    connect_default: Mutex<MockConnect>,
    switch_script: Mutex<VecDeque<Result<(), AdapterError>>>,
    add_script: Mutex<VecDeque<Result<(), AdapterError>>>,
    disconnect_result: Mutex<Result<(), AdapterError>>,
    latency: Mutex<Duration>,
    permissions: Permissions,
    events: broadcast::Sender<AdapterEvent>,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    switch_calls: AtomicUsize,
    add_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    switched_to: Mutex<Vec<Chain>>,
}

impl MockAdapter {
    /// Adapter that connects `addresses` on `chain` every time.
    pub fn new<I, S>(wallet_id: &str, addresses: I, chain: Chain) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (events, _) = broadcast::channel(32);
        Self {
            wallet_id: WalletId::from(wallet_id),
            connect_script: Mutex::new(VecDeque::new()),
            connect_default: Mutex::new(MockConnect::Succeed {
                accounts: Account::from_addresses(addresses),
                chain,
            }),
            switch_script: Mutex::new(VecDeque::new()),
            add_script: Mutex::new(VecDeque::new()),
            disconnect_result: Mutex::new(Ok(())),
            latency: Mutex::new(Duration::ZERO),
            permissions: Permissions {
                methods: vec!["eth_sendTransaction".into(), "personal_sign".into()],
                events: vec!["accountsChanged".into(), "chainChanged".into()],
                ..Permissions::default()
            },
            events,
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            switch_calls: AtomicUsize::new(0),
            add_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            switched_to: Mutex::new(Vec::new()),
        }
    }

    /// Queue outcomes for the next `connect` calls.
    pub fn script_connect(&self, outcomes: impl IntoIterator<Item = MockConnect>) -> &Self {
        self.connect_script.lock().extend(outcomes);
        self
    }

    /// Outcome once the connect script is exhausted.
    pub fn set_connect_default(&self, outcome: MockConnect) -> &Self {
        *self.connect_default.lock() = outcome;
        self
    }

    pub fn script_switch(&self, outcomes: impl IntoIterator<Item = Result<(), AdapterError>>) -> &Self {
        self.switch_script.lock().extend(outcomes);
        self
    }

    pub fn script_add_chain(&self, outcomes: impl IntoIterator<Item = Result<(), AdapterError>>) -> &Self {
        self.add_script.lock().extend(outcomes);
        self
    }

    pub fn set_disconnect_result(&self, result: Result<(), AdapterError>) -> &Self {
        *self.disconnect_result.lock() = result;
        self
    }

    /// Simulated time every operation takes.
    pub fn set_latency(&self, latency: Duration) -> &Self {
        *self.latency.lock() = latency;
        self
    }

    /// Push a wallet-originated notification to subscribers.
    pub fn emit(&self, event: AdapterEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn switch_calls(&self) -> usize {
        self.switch_calls.load(Ordering::SeqCst)
    }

    pub fn add_chain_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn switched_to(&self) -> Vec<Chain> {
        self.switched_to.lock().clone()
    }

    async fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        // Guard first: a call cancelled during the latency still leaves.
        let guard = InFlight(&self.in_flight);
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        guard
    }

    fn next_connect(&self) -> MockConnect {
        self.connect_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.connect_default.lock().clone())
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl WalletAdapter for MockAdapter {
    fn wallet_id(&self) -> &WalletId {
        &self.wallet_id
    }

    async fn connect(&self, _options: &ConnectOptions) -> Result<ConnectionResult, AdapterError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let _guard = self.enter().await;

        let mut outcome = self.next_connect();
        loop {
            match outcome {
                MockConnect::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    outcome = *inner;
                }
                MockConnect::Fail(e) => return Err(e),
                MockConnect::Succeed { accounts, chain } => {
                    return Ok(ConnectionResult {
                        accounts,
                        chain,
                        provider: Some(ProviderHandle::new(self.wallet_id.clone())),
                        permissions: self.permissions.clone(),
                    })
                }
            }
        }
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        let _guard = self.enter().await;
        self.disconnect_result.lock().clone()
    }

    async fn switch_chain(&self, chain: &Chain) -> Result<(), AdapterError> {
        self.switch_calls.fetch_add(1, Ordering::SeqCst);
        let _guard = self.enter().await;
        let result = self.switch_script.lock().pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.switched_to.lock().push(chain.clone());
        }
        result
    }

    async fn add_chain(&self, _chain: &Chain) -> Result<(), AdapterError> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        let _guard = self.enter().await;
        self.add_script.lock().pop_front().unwrap_or(Ok(()))
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<AdapterEvent>> {
        Some(self.events.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn script_then_default() {
        let adapter = MockAdapter::new("w1", ["0xaaa"], Chain::evm(1, "Ethereum"));
        adapter.script_connect([MockConnect::Fail(AdapterError::Rejected("no".into()))]);

        let first = adapter.connect(&ConnectOptions::default()).await;
        assert_eq!(first.unwrap_err(), AdapterError::Rejected("no".into()));
        let second = adapter.connect(&ConnectOptions::default()).await.unwrap();
        assert_eq!(second.accounts.len(), 1);
        assert!(second.provider.is_some());
        assert_eq!(adapter.connect_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_resolves_inner() {
        let adapter = MockAdapter::new("w1", ["0xaaa"], Chain::evm(1, "Ethereum"));
        adapter.script_connect([MockConnect::delayed(
            Duration::from_secs(5),
            MockConnect::Fail(AdapterError::Timeout),
        )]);
        let started = tokio::time::Instant::now();
        let result = adapter.connect(&ConnectOptions::default()).await;
        assert_eq!(result.unwrap_err(), AdapterError::Timeout);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn switch_records_targets() {
        let adapter = MockAdapter::new("w1", ["0xaaa"], Chain::evm(1, "Ethereum"));
        adapter.script_switch([Err(AdapterError::Rpc { code: 4902, message: "unknown".into() })]);
        let polygon = Chain::evm(137, "Polygon");
        assert!(adapter.switch_chain(&polygon).await.is_err());
        adapter.switch_chain(&polygon).await.unwrap();
        assert_eq!(adapter.switched_to(), vec![polygon]);
        assert_eq!(adapter.switch_calls(), 2);
    }

    #[tokio::test]
    async fn emits_to_subscribers() {
        let adapter = MockAdapter::new("w1", ["0xaaa"], Chain::evm(1, "Ethereum"));
        let mut rx = adapter.subscribe().unwrap();
        assert_eq!(adapter.emit(AdapterEvent::ConnectionLost { reason: "locked".into() }), 1);
        assert_eq!(rx.recv().await.unwrap().name(), "connection:lost");
    }
}
