use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use hinge_core::{Event, EventKind, SessionId, WalletId};
use hinge_settings::HealthSettings;

use crate::context::ClientContext;
use crate::state::ConnectionStatus;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub stale_after: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self::from(&HealthSettings::default())
    }
}

impl From<&HealthSettings> for HealthConfig {
    fn from(settings: &HealthSettings) -> Self {
        Self {
            enabled: settings.enabled,
            interval: Duration::from_millis(settings.interval_ms),
            stale_after: Duration::from_millis(settings.stale_after_ms),
        }
    }
}

/// A connected session that has been idle past the threshold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaleSession {
    pub wallet_id: WalletId,
    pub session_id: SessionId,
    pub idle_ms: i64,
}

/// Periodic sweep over connected wallets. Findings are logged and published
/// as `health:stale`; nothing is reconnected or ended. The sweep reads state
/// without taking wallet locks.
pub struct HealthMonitor {
    ctx: Arc<ClientContext>,
    config: HealthConfig,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl HealthMonitor {
    pub fn new(ctx: Arc<ClientContext>, config: HealthConfig) -> Self {
        Self {
            ctx,
            config,
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// One pass at time `now` (ms).
    pub fn sweep(&self, now: i64) -> Vec<StaleSession> {
        let threshold = i64::try_from(self.config.stale_after.as_millis()).unwrap_or(i64::MAX);
        let mut stale = Vec::new();

        for wallet_id in self.ctx.tracker().wallets_in(ConnectionStatus::Connected) {
            let Some(session) = self.ctx.store().live_session_for(&wallet_id) else {
                continue;
            };
            let idle_ms = now - session.last_active_at;
            if idle_ms <= threshold {
                continue;
            }
            warn!(
                wallet_id = %wallet_id,
                session_id = %session.id,
                idle_ms,
                "session stale"
            );
            self.ctx.bus().publish(
                Event::new(EventKind::HealthStale)
                    .wallet(&wallet_id)
                    .session(&session.id)
                    .chain(&session.chain.id)
                    .data(json!({ "idleMs": idle_ms, "staleAfterMs": threshold })),
            );
            stale.push(StaleSession {
                wallet_id,
                session_id: session.id,
                idle_ms,
            });
        }
        debug!(stale = stale.len(), "health sweep finished");
        stale
    }

    /// Run [`HealthMonitor::sweep`] every interval until stopped or the
    /// client shuts down. Returns false when disabled, already running, or
    /// the client has shut down.
    pub fn start(self: &Arc<Self>) -> bool {
        if !self.config.enabled || self.config.interval.is_zero() || self.ctx.is_shut_down() {
            return false;
        }
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|(_, handle)| !handle.is_finished()) {
            return false;
        }

        let cancel = self.ctx.shutdown_token().child_token();
        let monitor = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        monitor.sweep(hinge_core::now_millis());
                    }
                }
            }
        });
        *task = Some((cancel, handle));
        true
    }

    pub fn stop(&self) -> bool {
        match self.task.lock().take() {
            Some((cancel, _)) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|(cancel, handle)| !cancel.is_cancelled() && !handle.is_finished())
    }
}
