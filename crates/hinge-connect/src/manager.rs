use std::sync::Arc;

use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use hinge_core::{
    AdapterError, AdapterEvent, ConnectOptions, ConnectionResult, EventKind, HingeError, Result, WalletAdapter,
    WalletId,
};
use hinge_store::{CreateSessionParams, Session, SessionStatus};

use crate::context::ClientContext;
use crate::recovery::{recovery_delay, RecoveryOptions};
use crate::state::{ConnectionRecord, ConnectionStatus};

/// Run the adapter's connect, giving up with `Timeout` once
/// `options.timeout` elapses.
async fn connect_within(
    adapter: &dyn WalletAdapter,
    options: &ConnectOptions,
) -> std::result::Result<ConnectionResult, AdapterError> {
    match options.timeout {
        Some(limit) => tokio::time::timeout(limit, adapter.connect(options))
            .await
            .unwrap_or(Err(AdapterError::Timeout)),
        None => adapter.connect(options).await,
    }
}

/// Who started a connect attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Trigger {
    Caller,
    Recovery,
    Manual,
}

/// Connection lifecycle coordinator.
///
/// Every operation on a wallet runs under that wallet's lock, so a connect
/// and a disconnect for the same wallet never interleave. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    ctx: Arc<ClientContext>,
}

impl ConnectionManager {
    pub fn new(ctx: Arc<ClientContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<ClientContext> {
        &self.ctx
    }

    pub fn state(&self, wallet_id: &WalletId) -> Option<ConnectionRecord> {
        self.ctx.tracker().get(wallet_id)
    }

    /// Connect through `adapter`. Returns the wallet's current session if it
    /// is already connected. An adapter failure is returned exactly as the
    /// adapter produced it, after background recovery has been scheduled
    /// when the wallet's policy allows it.
    #[instrument(skip(self, adapter, options), fields(wallet_id = %adapter.wallet_id()))]
    pub async fn connect(&self, adapter: Arc<dyn WalletAdapter>, options: ConnectOptions) -> Result<Session> {
        let wallet_id = adapter.wallet_id().clone();
        self.ctx.cancel_recovery(&wallet_id);
        let _guard = self.ctx.locks().acquire(&wallet_id).await;

        self.ctx.register_adapter(Arc::clone(&adapter));

        if self.ctx.tracker().status(&wallet_id) == Some(ConnectionStatus::Connected) {
            if let Some(session) = self.ctx.store().live_session_for(&wallet_id) {
                debug!(session_id = %session.id, "already connected");
                return Ok(session);
            }
            // Connected without a live session: settle the record first.
            self.ctx.tracker().transition(&wallet_id, ConnectionStatus::Disconnecting)?;
            self.ctx.tracker().transition(&wallet_id, ConnectionStatus::Disconnected)?;
        }

        let result = self.attempt(&adapter, &options, Trigger::Caller).await;
        if result.is_err() {
            self.maybe_schedule_recovery(&wallet_id);
        }
        result
    }

    /// One connect attempt. Caller must hold the wallet lock.
    async fn attempt(
        &self,
        adapter: &Arc<dyn WalletAdapter>,
        options: &ConnectOptions,
        trigger: Trigger,
    ) -> Result<Session> {
        let wallet_id = adapter.wallet_id().clone();
        let tracker = self.ctx.tracker();

        let record = tracker.begin_attempt(&wallet_id, trigger == Trigger::Caller)?;
        self.ctx.emit(
            EventKind::ConnectionInitiated,
            &wallet_id,
            json!({ "attempt": record.attempts, "trigger": trigger_name(trigger), "silent": options.silent }),
        );
        self.ctx.emit(
            EventKind::ConnectionEstablishing,
            &wallet_id,
            json!({ "attempt": record.attempts }),
        );

        let connection = match connect_within(adapter.as_ref(), options).await {
            Ok(connection) => connection,
            Err(e) => {
                self.record_failure(&wallet_id, &e, record.attempts)?;
                return Err(e.into());
            }
        };

        let params = CreateSessionParams::new(wallet_id.clone(), connection.accounts, connection.chain)
            .with_provider(connection.provider)
            .with_permissions(connection.permissions);
        // Validate before committing to `connected`.
        let stale = self.ctx.store().get_wallet_sessions(&wallet_id);
        let session = match self.ctx.store().create_session(params) {
            Ok(session) => session,
            Err(e) => {
                warn!(wallet_id = %wallet_id, error = %e, "adapter returned an unusable connection");
                tracker.fail(&wallet_id, e.clone())?;
                self.ctx.emit(
                    EventKind::ConnectionFailed,
                    &wallet_id,
                    json!({ "attempt": record.attempts, "error": e.to_string(), "kind": e.error_kind() }),
                );
                return Err(e);
            }
        };
        tracker.transition(&wallet_id, ConnectionStatus::Connected)?;

        // A reconnect replaces whatever the wallet had before.
        for old in stale.into_iter().filter(Session::is_live) {
            self.end_and_announce(&old, "replaced");
        }

        self.ctx.bus().publish(
            hinge_core::Event::new(EventKind::SessionCreated)
                .wallet(&wallet_id)
                .session(&session.id)
                .chain(&session.chain.id)
                .data(json!({ "version": session.version, "accounts": session.accounts.len() })),
        );
        self.ctx.bus().publish(
            hinge_core::Event::new(EventKind::ConnectionEstablished)
                .wallet(&wallet_id)
                .session(&session.id)
                .chain(&session.chain.id)
                .data(json!({ "attempt": record.attempts })),
        );
        info!(wallet_id = %wallet_id, session_id = %session.id, attempt = record.attempts, "wallet connected");

        self.start_monitor(adapter);
        Ok(session)
    }

    fn record_failure(&self, wallet_id: &WalletId, error: &AdapterError, attempt: u32) -> Result<()> {
        warn!(wallet_id = %wallet_id, attempt, error = %error, "connect attempt failed");
        self.ctx.tracker().fail(wallet_id, error.clone().into())?;
        self.ctx.emit(
            EventKind::ConnectionFailed,
            wallet_id,
            json!({ "attempt": attempt, "error": error.to_string(), "kind": error.error_kind() }),
        );
        Ok(())
    }

    /// Disconnect the wallet. Pending recovery is cancelled first; the record
    /// always ends `disconnected`, and an adapter failure is returned only
    /// after cleanup finished.
    #[instrument(skip(self), fields(wallet_id = %wallet_id))]
    pub async fn disconnect(&self, wallet_id: &WalletId, reason: Option<String>) -> Result<()> {
        self.ctx.cancel_recovery(wallet_id);
        let _guard = self.ctx.locks().acquire(wallet_id).await;
        self.ctx.cancel_monitor(wallet_id);

        let reason = reason.unwrap_or_else(|| "user".to_string());
        let tracker = self.ctx.tracker();
        let status = tracker.status(wallet_id);

        let mut adapter_result = Ok(());
        if matches!(status, Some(ConnectionStatus::Connected | ConnectionStatus::Error)) {
            tracker.transition(wallet_id, ConnectionStatus::Disconnecting)?;
            if let Some(adapter) = self.ctx.adapter(wallet_id) {
                adapter_result = adapter.disconnect().await;
            }
            if let Err(e) = &adapter_result {
                warn!(error = %e, "adapter disconnect failed, continuing cleanup");
                tracker.set_error(wallet_id, e.clone().into())?;
            }
            tracker.transition(wallet_id, ConnectionStatus::Disconnected)?;
        }

        for session in self.ctx.store().get_wallet_sessions(wallet_id) {
            if session.is_live() {
                self.end_and_announce(&session, &reason);
            }
        }

        self.ctx.emit(
            EventKind::ConnectionLost,
            wallet_id,
            json!({ "reason": reason, "requested": true }),
        );
        info!(reason = %reason, "wallet disconnected");
        adapter_result.map_err(HingeError::from)
    }

    fn end_and_announce(&self, session: &Session, reason: &str) {
        match self.ctx.store().end_session(&session.id) {
            Ok(ended) => {
                self.ctx.bus().publish(
                    hinge_core::Event::new(EventKind::SessionEnded)
                        .wallet(&ended.wallet_id)
                        .session(&ended.id)
                        .chain(&ended.chain.id)
                        .data(json!({ "reason": reason, "activeTimeMs": ended.active_time_ms })),
                );
            }
            Err(e) => warn!(session_id = %session.id, error = %e, "failed to end session"),
        }
    }

    /// Replace the recovery policy of one wallet.
    pub fn configure_recovery(&self, wallet_id: &WalletId, options: RecoveryOptions) -> ConnectionRecord {
        self.ctx.tracker().configure(wallet_id, &options)
    }

    fn maybe_schedule_recovery(&self, wallet_id: &WalletId) {
        let auto = self
            .ctx
            .tracker()
            .get(wallet_id)
            .is_some_and(|r| r.auto_reconnect);
        if auto {
            self.schedule_recovery(wallet_id);
        }
    }

    /// Start background reconnection for a wallet in `error`. Returns false
    /// when no adapter is known or the client is shutting down. A task
    /// already running for the wallet is replaced.
    pub fn schedule_recovery(&self, wallet_id: &WalletId) -> bool {
        if self.ctx.is_shut_down() || self.ctx.adapter(wallet_id).is_none() {
            return false;
        }
        let generation = self.ctx.next_generation();
        let cancel = self.ctx.shutdown_token().child_token();
        let manager = self.clone();
        let task_wallet = wallet_id.clone();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            manager.recovery_loop(&task_wallet, &task_cancel).await;
            manager.ctx.clear_recovery(&task_wallet, generation);
        });
        self.ctx.set_recovery(wallet_id, generation, cancel, handle);
        true
    }

    /// Retries until connected, exhausted, cancelled, or the wallet leaves
    /// `error`. Each round re-reads the record so outside changes count.
    async fn recovery_loop(&self, wallet_id: &WalletId, cancel: &CancellationToken) {
        loop {
            let Some(record) = self.ctx.tracker().get(wallet_id) else {
                return;
            };
            if record.status != ConnectionStatus::Error {
                debug!(wallet_id = %wallet_id, status = %record.status, "recovery halted");
                return;
            }
            if record.attempts_exhausted() {
                self.exhausted(wallet_id, record.attempts);
                return;
            }

            let retry = record.attempts.saturating_sub(1);
            let delay = recovery_delay(record.strategy, record.recovery_options().interval, retry);
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            debug!(wallet_id = %wallet_id, attempt = record.attempts + 1, delay_ms, "recovery scheduled");
            self.ctx.emit(
                EventKind::RecoveryScheduled,
                wallet_id,
                json!({ "attempt": record.attempts + 1, "delayMs": delay_ms, "strategy": record.strategy }),
            );

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let _guard = tokio::select! {
                _ = cancel.cancelled() => return,
                guard = self.ctx.locks().acquire(wallet_id) => guard,
            };
            if cancel.is_cancelled() {
                return;
            }

            // Re-check under the lock: a caller may have connected or
            // disconnected while this task slept.
            let Some(record) = self.ctx.tracker().get(wallet_id) else {
                return;
            };
            if record.status != ConnectionStatus::Error {
                return;
            }
            if record.attempts_exhausted() {
                self.exhausted(wallet_id, record.attempts);
                return;
            }
            let Some(adapter) = self.ctx.adapter(wallet_id) else {
                return;
            };

            match self.attempt(&adapter, &ConnectOptions::silent(), Trigger::Recovery).await {
                Ok(session) => {
                    self.announce_restored(&session);
                    return;
                }
                Err(e) => debug!(wallet_id = %wallet_id, error = %e, "recovery attempt failed"),
            }
        }
    }

    fn exhausted(&self, wallet_id: &WalletId, attempts: u32) {
        warn!(wallet_id = %wallet_id, attempts, "recovery exhausted");
        let error = HingeError::RecoveryExhausted {
            wallet_id: wallet_id.to_string(),
            attempts,
        };
        if let Err(e) = self.ctx.tracker().set_error(wallet_id, error.clone()) {
            debug!(error = %e, "record vanished before exhaustion was stored");
        }
        self.ctx.emit(
            EventKind::RecoveryFailed,
            wallet_id,
            json!({ "attempts": attempts, "error": error.to_string() }),
        );
    }

    fn announce_restored(&self, session: &Session) {
        let attempts = self.state(&session.wallet_id).map_or(0, |r| r.attempts);
        info!(wallet_id = %session.wallet_id, attempts, "connection restored");
        self.ctx.bus().publish(
            hinge_core::Event::new(EventKind::ConnectionRestored)
                .wallet(&session.wallet_id)
                .session(&session.id)
                .chain(&session.chain.id)
                .data(json!({ "attempts": attempts })),
        );
    }

    /// Idempotent. Returns whether a recovery task was pending.
    pub fn stop_recovery(&self, wallet_id: &WalletId) -> bool {
        let stopped = self.ctx.cancel_recovery(wallet_id);
        if stopped {
            debug!(wallet_id = %wallet_id, "recovery stopped");
        }
        stopped
    }

    /// Cancel any automatic retry and run one recovery attempt now, under the
    /// wallet lock. Failures are returned, not rescheduled.
    #[instrument(skip(self), fields(wallet_id = %wallet_id))]
    pub async fn start_manual_recovery(&self, wallet_id: &WalletId) -> Result<Session> {
        self.ctx.cancel_recovery(wallet_id);
        let _guard = self.ctx.locks().acquire(wallet_id).await;

        let adapter = self
            .ctx
            .adapter(wallet_id)
            .ok_or_else(|| HingeError::NotFound(format!("adapter for {wallet_id}")))?;
        if self.ctx.tracker().status(wallet_id) == Some(ConnectionStatus::Connected) {
            if let Some(session) = self.ctx.store().live_session_for(wallet_id) {
                return Ok(session);
            }
        }

        let session = self
            .attempt(&adapter, &ConnectOptions::silent(), Trigger::Manual)
            .await?;
        self.announce_restored(&session);
        Ok(session)
    }

    /// Tear down everything held for the wallet: record, lock entry, adapter,
    /// event monitor and recovery task. Sessions stay in the store.
    #[instrument(skip(self), fields(wallet_id = %wallet_id))]
    pub async fn remove(&self, wallet_id: &WalletId) -> Option<ConnectionRecord> {
        self.ctx.cancel_recovery(wallet_id);
        let guard = self.ctx.locks().acquire(wallet_id).await;
        self.ctx.cancel_monitor(wallet_id);
        self.ctx.remove_adapter(wallet_id);
        let record = self.ctx.tracker().remove(wallet_id);
        drop(guard);
        // Kept while another operation is queued on the wallet.
        self.ctx.locks().remove(wallet_id);
        debug!(removed = record.is_some(), "wallet state removed");
        record
    }

    fn start_monitor(&self, adapter: &Arc<dyn WalletAdapter>) {
        let Some(mut events) = adapter.subscribe() else {
            return;
        };
        let wallet_id = adapter.wallet_id().clone();
        let generation = self.ctx.next_generation();
        let cancel = self.ctx.shutdown_token().child_token();
        let manager = self.clone();
        let task_wallet = wallet_id.clone();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    received = events.recv() => received,
                };
                match received {
                    Ok(event) => manager.handle_adapter_event(&task_wallet, event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(wallet_id = %task_wallet, skipped, "adapter events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            manager.ctx.clear_monitor(&task_wallet, generation);
        });
        self.ctx.set_monitor(&wallet_id, generation, cancel, handle);
    }

    async fn handle_adapter_event(&self, wallet_id: &WalletId, event: AdapterEvent) {
        debug!(wallet_id = %wallet_id, event = event.name(), "adapter event");
        match event {
            AdapterEvent::ConnectionLost { reason } => self.connection_lost(wallet_id, reason).await,
            AdapterEvent::AccountsChanged { addresses } => {
                let mut event = hinge_core::Event::new(EventKind::AccountsChanged)
                    .wallet(wallet_id)
                    .data(json!({ "addresses": addresses }));
                if let Some(session) = self.ctx.store().live_session_for(wallet_id) {
                    event = event.session(&session.id).chain(&session.chain.id);
                }
                self.ctx.bus().publish(event);
            }
            AdapterEvent::ChainChanged { chain_id } => {
                let mut event = hinge_core::Event::new(EventKind::ChainChanged)
                    .wallet(wallet_id)
                    .chain(&chain_id);
                if let Some(session) = self.ctx.store().live_session_for(wallet_id) {
                    event = event
                        .session(&session.id)
                        .data(json!({ "from": session.chain.id, "to": chain_id }));
                }
                self.ctx.bus().publish(event);
            }
        }
    }

    async fn connection_lost(&self, wallet_id: &WalletId, reason: String) {
        {
            let _guard = self.ctx.locks().acquire(wallet_id).await;
            let tracker = self.ctx.tracker();
            if tracker.status(wallet_id) != Some(ConnectionStatus::Connected) {
                return;
            }
            warn!(wallet_id = %wallet_id, reason = %reason, "wallet dropped the connection");
            let error = HingeError::from(AdapterError::Unavailable(reason.clone()));
            if let Err(e) = tracker.fail(wallet_id, error).and_then(|_| tracker.reset_attempts(wallet_id)) {
                warn!(error = %e, "could not record lost connection");
                return;
            }
            for session in self.ctx.store().get_wallet_sessions(wallet_id) {
                if !session.is_live() {
                    continue;
                }
                if let Ok(updated) = self.ctx.store().update_status(&session.id, SessionStatus::Error) {
                    self.ctx.bus().publish(
                        hinge_core::Event::new(EventKind::SessionStatusChanged)
                            .wallet(wallet_id)
                            .session(&updated.id)
                            .data(json!({ "from": session.status, "to": updated.status })),
                    );
                }
            }
            self.ctx.emit(
                EventKind::ConnectionLost,
                wallet_id,
                json!({ "reason": reason, "requested": false }),
            );
        }
        self.maybe_schedule_recovery(wallet_id);
    }
}

fn trigger_name(trigger: Trigger) -> &'static str {
    match trigger {
        Trigger::Caller => "caller",
        Trigger::Recovery => "recovery",
        Trigger::Manual => "manual",
    }
}
