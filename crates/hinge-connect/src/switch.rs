use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, instrument, warn};

use hinge_core::account::same_address;
use hinge_core::{AdapterError, Chain, Event, EventKind, HingeError, Result, SessionId, WalletAdapter};
use hinge_store::{CreateSessionParams, Session, SessionStatus, SwitchRecord};

use crate::context::ClientContext;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SwitchOptions {
    /// On `ChainNotConfigured`, register the chain with the wallet and retry once.
    pub add_if_missing: bool,
}

impl SwitchOptions {
    pub fn add_if_missing() -> Self {
        Self { add_if_missing: true }
    }
}

/// Chain and account switching. A switch never edits a session: it ends the
/// old one and creates its successor with `version + 1`.
#[derive(Clone)]
pub struct SwitchProtocol {
    ctx: Arc<ClientContext>,
}

impl SwitchProtocol {
    pub fn new(ctx: Arc<ClientContext>) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, target, options), fields(session_id = %session_id, target = %target.id))]
    pub async fn switch_chain(
        &self,
        session_id: &SessionId,
        target: &Chain,
        reason: &str,
        options: SwitchOptions,
    ) -> Result<Session> {
        let session = self.live_session(session_id)?;
        if session.chain.id == target.id {
            return Ok(session);
        }

        let _guard = self.ctx.locks().acquire(&session.wallet_id).await;
        // Re-read: another operation may have switched or ended it meanwhile.
        let session = self.live_session(session_id)?;
        if session.chain.id == target.id {
            return Ok(session);
        }
        let adapter = self
            .ctx
            .adapter(&session.wallet_id)
            .ok_or_else(|| HingeError::NotFound(format!("adapter for {}", session.wallet_id)))?;

        self.ctx.bus().publish(
            Event::new(EventKind::ChainSwitching)
                .wallet(&session.wallet_id)
                .session(&session.id)
                .chain(&session.chain.id)
                .data(json!({ "from": session.chain.id, "to": target.id, "reason": reason })),
        );
        self.ctx.store().update_status(&session.id, SessionStatus::Switching)?;

        let mut record = SwitchRecord::chain(Some(&session.chain.id), &target.id, reason);
        record.is_new_chain = !session.has_visited(&target.id);

        if let Err(e) = self.request_switch(adapter.as_ref(), target, options).await {
            return Err(self.switch_failed(&session, record, e));
        }

        clock_past(session.created_at).await;
        let mut params = CreateSessionParams::derived_from(&session, session.accounts.clone(), target.clone());
        params.switch_history.push(record.clone());
        let next = match self.ctx.store().create_session(params) {
            Ok(next) => next,
            Err(e) => {
                self.restore(&session);
                return Err(e);
            }
        };
        self.retire(&session, &next, record.clone());

        info!(
            wallet_id = %next.wallet_id,
            from = %session.chain.id,
            to = %target.id,
            version = next.version,
            "chain switched"
        );
        self.ctx.bus().publish(
            Event::new(EventKind::ChainSwitched)
                .wallet(&next.wallet_id)
                .session(&next.id)
                .chain(&target.id)
                .data(json!({
                    "from": session.chain.id,
                    "to": target.id,
                    "previousSessionId": session.id,
                    "isNewChain": record.is_new_chain,
                    "reason": reason,
                })),
        );
        Ok(next)
    }

    /// Ask the wallet to change chain, adding it first when allowed.
    async fn request_switch(
        &self,
        adapter: &dyn WalletAdapter,
        target: &Chain,
        options: SwitchOptions,
    ) -> std::result::Result<(), AdapterError> {
        if !target.family.supports_switching() {
            return Err(AdapterError::Unsupported(format!(
                "{} networks are single-network; cannot switch to {}",
                target.family.as_str(),
                target.id
            )));
        }

        match normalize(adapter.switch_chain(target).await, target) {
            Err(AdapterError::ChainNotConfigured { .. }) if options.add_if_missing => {
                normalize(adapter.add_chain(target).await, target)?;
                self.ctx.bus().publish(
                    Event::new(EventKind::ChainAdded)
                        .wallet(adapter.wallet_id())
                        .chain(&target.id)
                        .data(json!({ "name": target.name })),
                );
                normalize(adapter.switch_chain(target).await, target)
            }
            other => other,
        }
    }

    fn switch_failed(&self, session: &Session, record: SwitchRecord, error: AdapterError) -> HingeError {
        warn!(
            wallet_id = %session.wallet_id,
            to = %record.to_chain,
            error = %error,
            "chain switch failed"
        );
        self.restore(session);
        if let Some(ws_id) = &session.wallet_session_id {
            if let Err(e) = self.ctx.store().record_wallet_switch(ws_id, record.clone().failed()) {
                warn!(error = %e, "could not record failed switch");
            }
        }
        self.ctx.bus().publish(
            Event::new(EventKind::ChainSwitchFailed)
                .wallet(&session.wallet_id)
                .session(&session.id)
                .chain(&session.chain.id)
                .data(json!({
                    "from": session.chain.id,
                    "to": record.to_chain,
                    "reason": record.reason,
                    "error": error.to_string(),
                    "kind": error.error_kind(),
                    "recoverable": error.is_recoverable(),
                })),
        );
        error.into()
    }

    /// Put back the status `session` had before the switch began.
    fn restore(&self, session: &Session) {
        if let Err(e) = self.ctx.store().update_status(&session.id, session.status) {
            warn!(session_id = %session.id, error = %e, "could not restore session status");
        }
    }

    /// End `old` now that `next` replaced it and log the switch on the
    /// wallet's multi-chain history.
    fn retire(&self, old: &Session, next: &Session, record: SwitchRecord) {
        match self.ctx.store().end_session(&old.id) {
            Ok(ended) => {
                self.ctx.bus().publish(
                    Event::new(EventKind::SessionEnded)
                        .wallet(&ended.wallet_id)
                        .session(&ended.id)
                        .chain(&ended.chain.id)
                        .data(json!({ "reason": "superseded", "nextSessionId": next.id })),
                );
            }
            Err(e) => warn!(session_id = %old.id, error = %e, "could not end superseded session"),
        }
        if let Some(ws_id) = &next.wallet_session_id {
            if let Err(e) = self.ctx.store().record_wallet_switch(ws_id, record) {
                warn!(error = %e, "could not record switch");
            }
        }
    }

    /// Move the active flag to `address`. The wallet is not consulted: the
    /// account set was granted at connect time.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn switch_account(&self, session_id: &SessionId, address: &str, reason: &str) -> Result<Session> {
        let session = self.live_session(session_id)?;
        check_account(&session, address)?;
        if is_active_account(&session, address) {
            return Ok(session);
        }

        let _guard = self.ctx.locks().acquire(&session.wallet_id).await;
        let session = self.live_session(session_id)?;
        check_account(&session, address)?;
        if is_active_account(&session, address) {
            return Ok(session);
        }

        let from = session
            .active_account()
            .map(|a| a.address.clone())
            .unwrap_or_default();
        let accounts = session
            .accounts
            .iter()
            .cloned()
            .map(|mut a| {
                a.is_active = same_address(&a.address, address);
                a
            })
            .collect();
        let to = session
            .find_account(address)
            .map(|a| a.address.clone())
            .unwrap_or_else(|| address.to_string());

        let record = SwitchRecord::account(&session.chain.id, &from, &to, reason);
        clock_past(session.created_at).await;
        let mut params = CreateSessionParams::derived_from(&session, accounts, session.chain.clone());
        params.switch_history.push(record.clone());
        let next = self.ctx.store().create_session(params)?;
        self.retire(&session, &next, record);

        info!(wallet_id = %next.wallet_id, from = %from, to = %to, "account switched");
        self.ctx.bus().publish(
            Event::new(EventKind::SessionUpdated)
                .wallet(&next.wallet_id)
                .session(&next.id)
                .chain(&next.chain.id)
                .data(json!({
                    "previousSessionId": session.id,
                    "fromAccount": from,
                    "toAccount": to,
                    "reason": reason,
                })),
        );
        Ok(next)
    }

    fn live_session(&self, session_id: &SessionId) -> Result<Session> {
        let session = self
            .ctx
            .store()
            .peek_session(session_id)
            .ok_or_else(|| HingeError::NotFound(format!("session {session_id}")))?;
        if !session.is_live() {
            return Err(HingeError::Validation(format!("session {session_id} has ended")));
        }
        Ok(session)
    }
}

/// Wait until the clock has moved past `after`, so a successor gets a
/// strictly later `created_at` that is still the real time.
async fn clock_past(after: i64) {
    while hinge_core::now_millis() <= after {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

fn check_account(session: &Session, address: &str) -> Result<()> {
    match session.find_account(address) {
        Some(_) => Ok(()),
        None => Err(HingeError::NotFound(format!("account {address} in session {}", session.id))),
    }
}

fn is_active_account(session: &Session, address: &str) -> bool {
    session
        .active_account()
        .is_some_and(|a| same_address(&a.address, address))
}

/// Raw EVM provider codes into their typed form.
fn normalize(result: std::result::Result<(), AdapterError>, target: &Chain) -> std::result::Result<(), AdapterError> {
    result.map_err(|e| match e {
        AdapterError::Rpc { code, message } => AdapterError::from_rpc_code(code, message, Some(&target.id)),
        other => other,
    })
}
