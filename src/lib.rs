//! Hinge: wallet session and connection lifecycle.
//!
//! [`HingeClient`] wires one client instance together: the session store,
//! the per-wallet connection tracker, the event bus, the connection manager
//! with its background recovery, the switch protocol, and the health sweep.
//! Nothing is global; two clients in one process share no state.

pub mod logging;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use serde_json::json;
use tracing::{debug, info, instrument};

use hinge_connect::{
    ClientContext, ConnectionManager, ConnectionRecord, ConnectionStateTracker, HealthConfig, HealthMonitor,
    RecoveryOptions, StaleSession, SwitchOptions, SwitchProtocol,
};
use hinge_core::{
    Chain, ConnectOptions, Event, EventKind, HingeError, Result, SessionId, WalletAdapter, WalletId,
    WalletSessionId,
};
use hinge_events::{EventBus, EventBusConfig};
use hinge_settings::HingeSettings;
use hinge_store::{
    CreateSessionParams, Database, Session, SessionStore, SqlitePersistence, StoreConfig, WalletSession,
};

pub use hinge_connect::{MockAdapter, MockConnect};
pub use hinge_core::{Account, AdapterError, ChainId};
pub use hinge_events::SubscribeOptions;
pub use logging::telemetry_config;

/// One wallet-connection client.
pub struct HingeClient {
    settings: HingeSettings,
    ctx: Arc<ClientContext>,
    manager: ConnectionManager,
    switch: SwitchProtocol,
    health: Arc<HealthMonitor>,
}

impl HingeClient {
    /// Build a client from settings. With `session.persistencePath` set,
    /// sessions are written through to SQLite and restored here.
    pub fn new(settings: HingeSettings) -> anyhow::Result<Self> {
        settings.validate().context("invalid settings")?;

        let store_config = StoreConfig::from(&settings.session);
        let store = match &settings.session.persistence_path {
            Some(path) => {
                let db = Database::open(Path::new(path))
                    .with_context(|| format!("failed to open session database at {path}"))?;
                let store = SessionStore::with_persistence(store_config, Arc::new(SqlitePersistence::new(db)));
                let restored = store.restore().context("failed to restore sessions")?;
                info!(path = %path, restored, "session store opened");
                store
            }
            None => SessionStore::new(store_config),
        };

        let tracker = ConnectionStateTracker::new(RecoveryOptions::from(&settings.recovery));
        let bus = EventBus::new(EventBusConfig::from(&settings.events));
        let ctx = Arc::new(ClientContext::new(Arc::new(store), tracker, bus));
        let health = Arc::new(HealthMonitor::new(Arc::clone(&ctx), HealthConfig::from(&settings.health)));

        Ok(Self {
            manager: ConnectionManager::new(Arc::clone(&ctx)),
            switch: SwitchProtocol::new(Arc::clone(&ctx)),
            health,
            ctx,
            settings,
        })
    }

    /// Load settings from `path` (defaults, file, then `HINGE_*` env) and
    /// build a client from them.
    pub fn from_settings_path(path: &Path) -> anyhow::Result<Self> {
        let settings = hinge_settings::load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?;
        Self::new(settings)
    }

    pub fn settings(&self) -> &HingeSettings {
        &self.settings
    }

    pub fn context(&self) -> &Arc<ClientContext> {
        &self.ctx
    }

    pub fn events(&self) -> &EventBus {
        self.ctx.bus()
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    // ── Connections ──

    pub async fn connect(&self, adapter: Arc<dyn WalletAdapter>, options: ConnectOptions) -> Result<Session> {
        self.manager.connect(adapter, options).await
    }

    pub async fn disconnect(&self, wallet_id: &WalletId, reason: Option<String>) -> Result<()> {
        self.manager.disconnect(wallet_id, reason).await
    }

    pub fn connection_state(&self, wallet_id: &WalletId) -> Option<ConnectionRecord> {
        self.manager.state(wallet_id)
    }

    pub fn configure_recovery(&self, wallet_id: &WalletId, options: RecoveryOptions) -> ConnectionRecord {
        self.manager.configure_recovery(wallet_id, options)
    }

    pub async fn start_manual_recovery(&self, wallet_id: &WalletId) -> Result<Session> {
        self.manager.start_manual_recovery(wallet_id).await
    }

    pub fn stop_recovery(&self, wallet_id: &WalletId) -> bool {
        self.manager.stop_recovery(wallet_id)
    }

    // ── Switching ──

    pub async fn switch_chain(
        &self,
        session_id: &SessionId,
        chain: &Chain,
        reason: &str,
        options: SwitchOptions,
    ) -> Result<Session> {
        self.switch.switch_chain(session_id, chain, reason, options).await
    }

    pub async fn switch_account(&self, session_id: &SessionId, address: &str, reason: &str) -> Result<Session> {
        self.switch.switch_account(session_id, address, reason).await
    }

    // ── Sessions ──

    /// Record a session directly, outside any adapter connect. Serialized
    /// with the wallet's other operations.
    #[instrument(skip(self, params), fields(wallet_id = %params.wallet_id))]
    pub async fn create_session(&self, params: CreateSessionParams) -> Result<Session> {
        let _guard = self.ctx.locks().acquire(&params.wallet_id).await;
        let session = self.ctx.store().create_session(params)?;
        self.ctx.bus().publish(
            Event::new(EventKind::SessionCreated)
                .wallet(&session.wallet_id)
                .session(&session.id)
                .chain(&session.chain.id)
                .data(json!({ "version": session.version, "accounts": session.accounts.len() })),
        );
        Ok(session)
    }

    pub fn get_session(&self, id: &SessionId) -> Option<Session> {
        self.ctx.store().get_session(id)
    }

    pub fn get_active_session(&self) -> Option<Session> {
        self.ctx.store().get_active_session()
    }

    pub fn get_wallet_sessions(&self, wallet_id: &WalletId) -> Vec<Session> {
        self.ctx.store().get_wallet_sessions(wallet_id)
    }

    pub fn get_wallet_session(&self, id: &WalletSessionId) -> Option<WalletSession> {
        self.ctx.store().get_wallet_session(id)
    }

    /// End one session record. The wallet's connection is left alone; use
    /// [`HingeClient::disconnect`] to tear that down. Ending an already
    /// ended session returns it unchanged and publishes nothing.
    #[instrument(skip(self), fields(session_id = %id))]
    pub async fn end_session(&self, id: &SessionId, reason: &str) -> Result<Session> {
        let wallet_id = self
            .ctx
            .store()
            .peek_session(id)
            .map(|s| s.wallet_id)
            .ok_or_else(|| HingeError::NotFound(format!("session {id}")))?;

        let _guard = self.ctx.locks().acquire(&wallet_id).await;
        let current = self
            .ctx
            .store()
            .peek_session(id)
            .ok_or_else(|| HingeError::NotFound(format!("session {id}")))?;
        if !current.is_live() {
            return Ok(current);
        }

        let ended = self.ctx.store().end_session(id)?;
        self.ctx.bus().publish(
            Event::new(EventKind::SessionEnded)
                .wallet(&ended.wallet_id)
                .session(&ended.id)
                .chain(&ended.chain.id)
                .data(json!({ "reason": reason, "activeTimeMs": ended.active_time_ms })),
        );
        Ok(ended)
    }

    /// Drop ended sessions whose expiry passed at `now` (ms), then end the
    /// live ones that are due, publishing `session:expired` for each. Newly
    /// expired records stay readable until the next pass. Returns them.
    #[instrument(skip(self))]
    pub fn expire_sessions(&self, now: i64) -> Vec<Session> {
        let removed = self.ctx.store().collect_garbage(now);
        let expired = self.ctx.store().expire_due(now);
        for session in &expired {
            self.ctx.bus().publish(
                Event::new(EventKind::SessionExpired)
                    .wallet(&session.wallet_id)
                    .session(&session.id)
                    .chain(&session.chain.id)
                    .data(json!({ "expiresAt": session.expires_at, "activeTimeMs": session.active_time_ms })),
            );
        }
        debug!(expired = expired.len(), removed = removed.len(), "expiry pass finished");
        expired
    }

    // ── Health ──

    /// Start the periodic health sweep. False when disabled or running.
    pub fn start_health(&self) -> bool {
        self.health.start()
    }

    pub fn stop_health(&self) -> bool {
        self.health.stop()
    }

    pub fn check_health(&self, now: i64) -> Vec<StaleSession> {
        self.health.sweep(now)
    }

    /// Stop the health sweep, recovery tasks, and adapter monitors.
    /// Sessions and connection records stay readable.
    pub fn shutdown(&self) {
        self.health.stop();
        self.ctx.shutdown();
        info!("hinge client shut down");
    }
}

impl Drop for HingeClient {
    fn drop(&mut self) {
        if !self.ctx.is_shut_down() {
            self.ctx.shutdown();
        }
    }
}
