use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use hinge_core::{HingeError, Result, SessionId, WalletId, WalletSessionId};
use hinge_settings::SessionSettings;

use crate::persistence::SessionPersistence;
use crate::session::{CreateSessionParams, Session, SessionStatus, SwitchRecord, WalletSession};

#[derive(Clone, Debug, Default)]
pub struct StoreConfig {
    /// Session lifetime from creation; `None` never expires.
    pub ttl_ms: Option<i64>,
}

impl From<&SessionSettings> for StoreConfig {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            ttl_ms: settings.ttl_ms.map(|ms| i64::try_from(ms).unwrap_or(i64::MAX)),
        }
    }
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, Session>,
    /// Insertion order, which is creation order.
    order: Vec<SessionId>,
    active: Option<SessionId>,
    wallet_sessions: HashMap<WalletSessionId, WalletSession>,
    by_wallet: HashMap<WalletId, WalletSessionId>,
}

impl Inner {
    fn get(&self, id: &SessionId) -> Result<&Session> {
        self.sessions
            .get(id)
            .ok_or_else(|| HingeError::NotFound(format!("session {id}")))
    }
}

/// Registry of sessions and their per-wallet multi-chain context.
///
/// Every read returns a clone and every update replaces the stored value, so
/// callers never observe a half-applied change.
pub struct SessionStore {
    config: StoreConfig,
    inner: RwLock<Inner>,
    persistence: Option<Arc<dyn SessionPersistence>>,
}

impl SessionStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner::default()),
            persistence: None,
        }
    }

    /// Store that writes every mutation through to `persistence`. Call
    /// [`SessionStore::restore`] to load what is already there.
    pub fn with_persistence(config: StoreConfig, persistence: Arc<dyn SessionPersistence>) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner::default()),
            persistence: Some(persistence),
        }
    }

    /// Replace in-memory state with the persisted snapshot. Returns the
    /// number of sessions loaded.
    #[instrument(skip(self))]
    pub fn restore(&self) -> Result<usize> {
        let Some(persistence) = &self.persistence else {
            return Ok(0);
        };
        let state = persistence.load()?;

        let mut restored = Inner::default();
        for session in state.sessions {
            restored.order.push(session.id.clone());
            restored.sessions.insert(session.id.clone(), session);
        }
        for ws in state.wallet_sessions {
            restored.by_wallet.insert(ws.wallet_id.clone(), ws.id.clone());
            restored.wallet_sessions.insert(ws.id.clone(), ws);
        }
        restored.active = state
            .active_session_id
            .filter(|id| restored.sessions.contains_key(id));

        let count = restored.sessions.len();
        *self.inner.write() = restored;
        info!(sessions = count, "session store restored");
        Ok(count)
    }

    /// Create a session and make it the active one.
    #[instrument(skip(self, params), fields(wallet_id = %params.wallet_id, chain = %params.chain.id))]
    pub fn create_session(&self, params: CreateSessionParams) -> Result<Session> {
        validate(&params)?;

        let now = hinge_core::now_millis();
        let mut inner = self.inner.write();

        let id = params.id.unwrap_or_else(SessionId::new);
        if inner.sessions.contains_key(&id) {
            return Err(HingeError::Validation(format!("session {id} already exists")));
        }

        let (version, created_at) = match &params.previous_session_id {
            Some(prev_id) => {
                let prev = inner.get(prev_id)?;
                // Never stamped ahead of the clock; callers wanting a strictly
                // later stamp wait for the clock to move.
                (prev.version + 1, now.max(prev.created_at))
            }
            None => (1, now),
        };

        let session = Session {
            id: id.clone(),
            wallet_id: params.wallet_id.clone(),
            version,
            status: SessionStatus::Connected,
            accounts: params.accounts,
            chain: params.chain,
            provider: params.provider,
            permissions: params.permissions,
            created_at,
            last_active_at: created_at,
            last_accessed_at: created_at,
            expires_at: self.config.ttl_ms.map(|ttl| created_at.saturating_add(ttl)),
            operation_count: 0,
            active_time_ms: 0,
            switch_history: params.switch_history,
            previous_session_id: params.previous_session_id,
            wallet_session_id: None,
        };

        inner.order.push(id.clone());
        inner.sessions.insert(id.clone(), session);
        let ws = attach(&mut inner, &params.wallet_id, &id, created_at);
        if let Some(stored) = inner.sessions.get_mut(&id) {
            stored.wallet_session_id = Some(ws.id.clone());
        }
        inner.active = Some(id.clone());
        let session = inner.get(&id)?.clone();
        drop(inner);

        self.write_session(&session);
        self.write_wallet_session(&ws);
        self.write_active(Some(&id));
        debug!(session_id = %id, version, "session created");
        Ok(session)
    }

    /// Fetch a session, touching its access time.
    pub fn get_session(&self, id: &SessionId) -> Option<Session> {
        let mut inner = self.inner.write();
        let session = inner.sessions.get_mut(id)?;
        session.last_accessed_at = hinge_core::now_millis().max(session.last_accessed_at);
        Some(session.clone())
    }

    /// Fetch a session without touching it.
    pub fn peek_session(&self, id: &SessionId) -> Option<Session> {
        self.inner.read().sessions.get(id).cloned()
    }

    /// The most recently activated session across all wallets.
    pub fn get_active_session(&self) -> Option<Session> {
        let inner = self.inner.read();
        inner.active.as_ref().and_then(|id| inner.sessions.get(id)).cloned()
    }

    /// All sessions for `wallet_id`, oldest first.
    pub fn get_wallet_sessions(&self, wallet_id: &WalletId) -> Vec<Session> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.sessions.get(id))
            .filter(|s| &s.wallet_id == wallet_id)
            .cloned()
            .collect()
    }

    /// The newest session of `wallet_id` that has not ended.
    pub fn live_session_for(&self, wallet_id: &WalletId) -> Option<Session> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.sessions.get(id))
            .find(|s| &s.wallet_id == wallet_id && s.is_live())
            .cloned()
    }

    pub fn sessions(&self) -> Vec<Session> {
        let inner = self.inner.read();
        inner.order.iter().filter_map(|id| inner.sessions.get(id)).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark a session terminal. The record stays until garbage collection.
    /// Ending an ended session returns it unchanged.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn end_session(&self, id: &SessionId) -> Result<Session> {
        let now = hinge_core::now_millis();
        let (session, active_cleared) = {
            let mut inner = self.inner.write();
            let current = inner.get(id)?;
            if !current.is_live() {
                return Ok(current.clone());
            }

            let mut next = current.clone();
            next.status = SessionStatus::Disconnected;
            next.active_time_ms = (now - next.created_at).max(0);
            next.last_active_at = now.max(next.last_active_at);
            inner.sessions.insert(id.clone(), next.clone());

            let active_cleared = inner.active.as_ref() == Some(id);
            if active_cleared {
                inner.active = None;
            }
            (next, active_cleared)
        };

        self.write_session(&session);
        if active_cleared {
            self.write_active(None);
        }
        debug!(active_time_ms = session.active_time_ms, "session ended");
        Ok(session)
    }

    pub fn update_status(&self, id: &SessionId, status: SessionStatus) -> Result<Session> {
        self.update(id, |s| s.status = status)
    }

    /// Count one operation against the session and refresh its activity time.
    pub fn record_activity(&self, id: &SessionId) -> Result<Session> {
        let now = hinge_core::now_millis();
        self.update(id, |s| {
            s.operation_count += 1;
            s.last_active_at = now.max(s.last_active_at);
        })
    }

    /// Replace the account list of a live session in place. Used when the
    /// wallet reports new balances or labels for the same addresses.
    pub fn update_accounts(&self, id: &SessionId, accounts: Vec<hinge_core::Account>) -> Result<Session> {
        validate_accounts(&accounts)?;
        self.update(id, |s| s.accounts = accounts)
    }

    fn update(&self, id: &SessionId, apply: impl FnOnce(&mut Session)) -> Result<Session> {
        let next = {
            let mut inner = self.inner.write();
            let mut next = inner.get(id)?.clone();
            apply(&mut next);
            inner.sessions.insert(id.clone(), next.clone());
            next
        };
        self.write_session(&next);
        Ok(next)
    }

    /// Drop ended sessions whose expiry has passed. Returns the removed ids.
    #[instrument(skip(self))]
    pub fn collect_garbage(&self, now: i64) -> Vec<SessionId> {
        let removed: Vec<SessionId> = {
            let mut inner = self.inner.write();
            let doomed: Vec<SessionId> = inner
                .sessions
                .values()
                .filter(|s| !s.is_live() && s.is_expired(now))
                .map(|s| s.id.clone())
                .collect();
            for id in &doomed {
                inner.sessions.remove(id);
            }
            inner.order.retain(|id| !doomed.contains(id));
            for ws in inner.wallet_sessions.values_mut() {
                ws.session_ids.retain(|id| !doomed.contains(id));
            }
            doomed
        };

        for id in &removed {
            if let Some(p) = &self.persistence {
                if let Err(e) = p.delete_session(id) {
                    warn!(session_id = %id, error = %e, "failed to delete persisted session");
                }
            }
        }
        if !removed.is_empty() {
            let touched: Vec<WalletSession> = self.inner.read().wallet_sessions.values().cloned().collect();
            for ws in &touched {
                self.write_wallet_session(ws);
            }
            info!(removed = removed.len(), "expired sessions collected");
        }
        removed
    }

    /// End every live session whose expiry has passed and return them.
    #[instrument(skip(self))]
    pub fn expire_due(&self, now: i64) -> Vec<Session> {
        let due: Vec<SessionId> = self
            .inner
            .read()
            .sessions
            .values()
            .filter(|s| s.is_live() && s.is_expired(now))
            .map(|s| s.id.clone())
            .collect();

        due.iter().filter_map(|id| self.end_session(id).ok()).collect()
    }

    /// Add `session_id` to the wallet's multi-chain context, creating the
    /// context on first use, and make it the context's active session.
    pub fn create_or_attach_wallet_session(
        &self,
        wallet_id: &WalletId,
        session_id: &SessionId,
    ) -> Result<WalletSession> {
        let ws = {
            let mut inner = self.inner.write();
            inner.get(session_id)?;
            let ws = attach(&mut inner, wallet_id, session_id, hinge_core::now_millis());
            if let Some(stored) = inner.sessions.get_mut(session_id) {
                stored.wallet_session_id = Some(ws.id.clone());
            }
            ws
        };
        self.write_wallet_session(&ws);
        Ok(ws)
    }

    pub fn get_wallet_session(&self, id: &WalletSessionId) -> Option<WalletSession> {
        self.inner.read().wallet_sessions.get(id).cloned()
    }

    pub fn wallet_session_for(&self, wallet_id: &WalletId) -> Option<WalletSession> {
        let inner = self.inner.read();
        inner
            .by_wallet
            .get(wallet_id)
            .and_then(|id| inner.wallet_sessions.get(id))
            .cloned()
    }

    /// Append a switch record to a wallet's multi-chain history.
    pub fn record_wallet_switch(&self, id: &WalletSessionId, record: SwitchRecord) -> Result<WalletSession> {
        let ws = {
            let mut inner = self.inner.write();
            let ws = inner
                .wallet_sessions
                .get_mut(id)
                .ok_or_else(|| HingeError::NotFound(format!("wallet session {id}")))?;
            ws.switch_history.push(record);
            ws.clone()
        };
        self.write_wallet_session(&ws);
        Ok(ws)
    }

    /// Forget everything about `wallet_id`: sessions and multi-chain context.
    #[instrument(skip(self), fields(wallet_id = %wallet_id))]
    pub fn remove_wallet(&self, wallet_id: &WalletId) -> usize {
        let (removed, ws_id, active_cleared) = {
            let mut inner = self.inner.write();
            let removed: Vec<SessionId> = inner
                .sessions
                .values()
                .filter(|s| &s.wallet_id == wallet_id)
                .map(|s| s.id.clone())
                .collect();
            for id in &removed {
                inner.sessions.remove(id);
            }
            inner.order.retain(|id| !removed.contains(id));
            let ws_id = inner.by_wallet.remove(wallet_id);
            if let Some(ws_id) = &ws_id {
                inner.wallet_sessions.remove(ws_id);
            }
            let active_cleared = inner.active.as_ref().is_some_and(|id| removed.contains(id));
            if active_cleared {
                inner.active = None;
            }
            (removed, ws_id, active_cleared)
        };

        if let Some(p) = &self.persistence {
            for id in &removed {
                if let Err(e) = p.delete_session(id) {
                    warn!(session_id = %id, error = %e, "failed to delete persisted session");
                }
            }
            if let Some(ws_id) = &ws_id {
                if let Err(e) = p.delete_wallet_session(ws_id) {
                    warn!(error = %e, "failed to delete persisted wallet session");
                }
            }
        }
        if active_cleared {
            self.write_active(None);
        }
        removed.len()
    }

    // Write-through failures are logged; memory stays authoritative.

    fn write_session(&self, session: &Session) {
        if let Some(p) = &self.persistence {
            if let Err(e) = p.save_session(session) {
                warn!(session_id = %session.id, error = %e, "failed to persist session");
            }
        }
    }

    fn write_wallet_session(&self, ws: &WalletSession) {
        if let Some(p) = &self.persistence {
            if let Err(e) = p.save_wallet_session(ws) {
                warn!(wallet_session_id = %ws.id, error = %e, "failed to persist wallet session");
            }
        }
    }

    fn write_active(&self, id: Option<&SessionId>) {
        if let Some(p) = &self.persistence {
            if let Err(e) = p.save_active(id) {
                warn!(error = %e, "failed to persist active session");
            }
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

fn attach(inner: &mut Inner, wallet_id: &WalletId, session_id: &SessionId, now: i64) -> WalletSession {
    let ws_id = inner
        .by_wallet
        .get(wallet_id)
        .cloned()
        .unwrap_or_else(WalletSessionId::new);
    let ws = inner
        .wallet_sessions
        .entry(ws_id.clone())
        .or_insert_with(|| WalletSession {
            id: ws_id.clone(),
            wallet_id: wallet_id.clone(),
            session_ids: Vec::new(),
            active_session_id: None,
            switch_history: Vec::new(),
            created_at: now,
        });
    if !ws.session_ids.contains(session_id) {
        ws.session_ids.push(session_id.clone());
    }
    ws.active_session_id = Some(session_id.clone());
    let ws = ws.clone();
    inner.by_wallet.insert(wallet_id.clone(), ws_id);
    ws
}

fn validate(params: &CreateSessionParams) -> Result<()> {
    if params.wallet_id.as_str().is_empty() {
        return Err(HingeError::Validation("wallet id must not be empty".into()));
    }
    validate_accounts(&params.accounts)
}

fn validate_accounts(accounts: &[hinge_core::Account]) -> Result<()> {
    if accounts.is_empty() {
        return Err(HingeError::Validation("session needs at least one account".into()));
    }
    match accounts.iter().filter(|a| a.is_active).count() {
        1 => Ok(()),
        n => Err(HingeError::Validation(format!(
            "exactly one account must be active, found {n}"
        ))),
    }
}
