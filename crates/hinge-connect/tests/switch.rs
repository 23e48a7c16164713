mod common;

use std::time::Duration;

use common::*;
use hinge_connect::SwitchOptions;
use hinge_core::{AdapterError, AdapterEvent, Chain, ChainId, ConnectOptions, EventKind, HingeError, SessionId};
use hinge_store::{Session, SessionStatus, SwitchKind};

async fn connected(h: &Harness) -> (std::sync::Arc<hinge_connect::MockAdapter>, Session) {
    let adapter = wallet("w1");
    let session = h.manager.connect(adapter.clone(), ConnectOptions::default()).await.unwrap();
    h.clear_events();
    (adapter, session)
}

#[tokio::test]
async fn switch_chain_creates_linked_session() {
    let h = Harness::new(no_recovery());
    let (adapter, original) = connected(&h).await;

    let switched = h
        .switch
        .switch_chain(&original.id, &polygon(), "user", SwitchOptions::default())
        .await
        .unwrap();

    assert_eq!(switched.chain, polygon());
    assert_eq!(switched.previous_session_id.as_ref(), Some(&original.id));
    assert_eq!(switched.version, 2);
    assert_eq!(switched.accounts, original.accounts);
    assert_eq!(switched.permissions, original.permissions);
    assert_eq!(switched.switch_history.len(), 1);
    let record = &switched.switch_history[0];
    assert_eq!(record.kind, SwitchKind::Chain);
    assert_eq!(record.reason, "user");
    assert_eq!(record.from_chain, Some(ethereum().id));
    assert!(record.success);
    assert!(record.is_new_chain);

    assert_eq!(adapter.switched_to(), vec![polygon()]);
    assert_eq!(h.ctx.store().get_active_session().unwrap().id, switched.id);
    let old = h.ctx.store().get_session(&original.id).unwrap();
    assert_eq!(old.status, SessionStatus::Disconnected);
    assert_eq!(old.chain, ethereum(), "old session is never edited in place");

    assert_eq!(
        h.kinds(),
        vec![EventKind::ChainSwitching, EventKind::SessionEnded, EventKind::ChainSwitched]
    );
    let ws = h.ctx.store().wallet_session_for(&original.wallet_id).unwrap();
    assert_eq!(ws.session_ids, vec![original.id.clone(), switched.id.clone()]);
    assert_eq!(ws.switch_history.len(), 1);
}

#[tokio::test]
async fn switch_to_current_chain_is_a_noop() {
    let h = Harness::new(no_recovery());
    let (adapter, original) = connected(&h).await;

    let same = h
        .switch
        .switch_chain(&original.id, &ethereum(), "user", SwitchOptions::default())
        .await
        .unwrap();

    assert_eq!(same, original);
    assert!(same.switch_history.is_empty());
    assert_eq!(adapter.switch_calls(), 0);
    assert!(h.kinds().is_empty());
}

#[tokio::test]
async fn repeated_switches_grow_history() {
    let h = Harness::new(no_recovery());
    let (_adapter, original) = connected(&h).await;
    let route = [polygon(), Chain::evm(10, "Optimism"), ethereum(), polygon()];

    let mut current = original;
    let mut sessions = vec![current.clone()];
    for chain in &route {
        current = h
            .switch
            .switch_chain(&current.id, chain, "dapp-request", SwitchOptions::default())
            .await
            .unwrap();
        sessions.push(current.clone());
    }

    for pair in sessions.windows(2) {
        assert!(pair[1].created_at > pair[0].created_at);
        assert_eq!(pair[1].switch_history.len(), pair[0].switch_history.len() + 1);
        assert_eq!(pair[1].version, pair[0].version + 1);
    }
    let fresh: Vec<bool> = current.switch_history.iter().map(|r| r.is_new_chain).collect();
    assert_eq!(fresh, vec![true, true, true, false]);
    assert_eq!(h.count(EventKind::ChainSwitched), 4);
}

#[tokio::test]
async fn unconfigured_chain_fails_and_restores_session() {
    let h = Harness::new(no_recovery());
    let (adapter, original) = connected(&h).await;
    adapter.script_switch([Err(AdapterError::Rpc {
        code: 4902,
        message: "Unrecognized chain ID".into(),
    })]);

    let err = h
        .switch
        .switch_chain(&original.id, &polygon(), "user", SwitchOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_chain_not_configured());
    assert_eq!(
        err,
        HingeError::Connection(AdapterError::ChainNotConfigured { chain_id: polygon().id })
    );
    let session = h.ctx.store().get_session(&original.id).unwrap();
    assert_eq!(session.status, SessionStatus::Connected);
    assert_eq!(h.ctx.store().get_active_session().unwrap().id, original.id);

    let ws = h.ctx.store().wallet_session_for(&original.wallet_id).unwrap();
    assert_eq!(ws.switch_history.len(), 1);
    assert!(!ws.switch_history[0].success);

    let failed = h.of(EventKind::ChainSwitchFailed);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].data["kind"], "chain_not_configured");
    assert_eq!(failed[0].data["recoverable"], true);
    assert_eq!(adapter.add_chain_calls(), 0);
}

#[tokio::test]
async fn missing_chain_is_added_then_retried() {
    let h = Harness::new(no_recovery());
    let (adapter, original) = connected(&h).await;
    adapter.script_switch([Err(AdapterError::Rpc {
        code: 4902,
        message: "Unrecognized chain ID".into(),
    })]);

    let switched = h
        .switch
        .switch_chain(&original.id, &polygon(), "user", SwitchOptions::add_if_missing())
        .await
        .unwrap();

    assert_eq!(switched.chain, polygon());
    assert_eq!(adapter.add_chain_calls(), 1);
    assert_eq!(adapter.switch_calls(), 2);
    assert_eq!(
        h.kinds(),
        vec![
            EventKind::ChainSwitching,
            EventKind::ChainAdded,
            EventKind::SessionEnded,
            EventKind::ChainSwitched,
        ]
    );
}

#[tokio::test]
async fn privacy_networks_cannot_switch() {
    let h = Harness::new(no_recovery());
    let (adapter, original) = connected(&h).await;

    let err = h
        .switch
        .switch_chain(&original.id, &Chain::privacy("mainnet", "Aleo"), "user", SwitchOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, HingeError::Connection(AdapterError::Unsupported(_))));
    assert_eq!(adapter.switch_calls(), 0);
    assert_eq!(h.ctx.store().get_session(&original.id).unwrap().status, SessionStatus::Connected);
}

#[tokio::test]
async fn unknown_or_ended_sessions_are_rejected() {
    let h = Harness::new(no_recovery());
    let err = h
        .switch
        .switch_chain(&SessionId::new(), &polygon(), "user", SwitchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, HingeError::NotFound(_)));

    let (_adapter, original) = connected(&h).await;
    h.manager.disconnect(&original.wallet_id, None).await.unwrap();
    let err = h
        .switch
        .switch_chain(&original.id, &polygon(), "user", SwitchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, HingeError::Validation(_)));
}

#[tokio::test]
async fn switch_account_moves_active_flag() {
    let h = Harness::new(no_recovery());
    let (adapter, original) = connected(&h).await;

    let switched = h.switch.switch_account(&original.id, "0xbbb2", "user").await.unwrap();

    let active: Vec<&str> = switched
        .accounts
        .iter()
        .filter(|a| a.is_active)
        .map(|a| a.address.as_str())
        .collect();
    assert_eq!(active, vec!["0xBBB2"]);
    assert_eq!(switched.chain, original.chain);
    assert_eq!(switched.previous_session_id.as_ref(), Some(&original.id));
    let record = switched.switch_history.last().unwrap();
    assert_eq!(record.kind, SwitchKind::Account);
    assert_eq!(record.from_account.as_deref(), Some("0xAAA1"));
    assert_eq!(record.to_account.as_deref(), Some("0xBBB2"));
    assert_eq!(adapter.switch_calls(), 0);

    let updated = h.of(EventKind::SessionUpdated);
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].data["toAccount"], "0xBBB2");
}

#[tokio::test]
async fn switch_account_edge_cases() {
    let h = Harness::new(no_recovery());
    let (_adapter, original) = connected(&h).await;

    let same = h.switch.switch_account(&original.id, "0xAAA1", "user").await.unwrap();
    assert_eq!(same, original);

    let err = h.switch.switch_account(&original.id, "0xCCC3", "user").await.unwrap_err();
    assert!(matches!(err, HingeError::NotFound(_)));
    assert!(h.kinds().is_empty());
}

#[tokio::test]
async fn chain_changed_notification_does_not_switch() {
    let h = Harness::new(no_recovery());
    let (adapter, original) = connected(&h).await;
    adapter.emit(AdapterEvent::ChainChanged {
        chain_id: ChainId::from("eip155:137"),
    });
    while h.count(EventKind::ChainChanged) == 0 {
        tokio::task::yield_now().await;
    }
    let active = h.ctx.store().get_active_session().unwrap();
    assert_eq!(active.id, original.id);
    assert_eq!(active.chain, ethereum());
}

#[tokio::test]
async fn rapid_switches_never_stamp_the_future() {
    let h = Harness::new(no_recovery());
    let (_adapter, original) = connected(&h).await;

    let mut current = original;
    for i in 0..20 {
        let next = if i % 4 == 3 {
            let address = if current.active_account().unwrap().address == "0xAAA1" { "0xBBB2" } else { "0xAAA1" };
            h.switch.switch_account(&current.id, address, "user").await.unwrap()
        } else {
            let chain = if current.chain == polygon() { ethereum() } else { polygon() };
            h.switch
                .switch_chain(&current.id, &chain, "dapp-request", SwitchOptions::default())
                .await
                .unwrap()
        };
        let now = hinge_core::now_millis();
        assert!(next.created_at > current.created_at);
        assert!(next.created_at <= now, "stamped {} ahead", next.created_at - now);
        assert!(next.last_active_at <= now);
        current = next;
    }
    assert_eq!(current.version, 21);
}

#[tokio::test(start_paused = true)]
async fn disconnect_waits_for_inflight_switch() {
    let h = Harness::new(no_recovery());
    let (adapter, original) = connected(&h).await;
    adapter.set_latency(Duration::from_millis(200));

    let switch = {
        let protocol = h.switch.clone();
        let id = original.id.clone();
        tokio::spawn(async move {
            protocol
                .switch_chain(&id, &polygon(), "user", SwitchOptions::default())
                .await
        })
    };
    tokio::task::yield_now().await;
    assert_eq!(adapter.switch_calls(), 1);

    let disconnect = {
        let manager = h.manager.clone();
        let w = original.wallet_id.clone();
        tokio::spawn(async move { manager.disconnect(&w, None).await })
    };

    let switched = switch.await.unwrap().unwrap();
    disconnect.await.unwrap().unwrap();

    assert_eq!(adapter.max_in_flight(), 1);
    let kinds = h.kinds();
    let switched_at = kinds.iter().position(|k| *k == EventKind::ChainSwitched).unwrap();
    let lost_at = kinds.iter().position(|k| *k == EventKind::ConnectionLost).unwrap();
    assert!(switched_at < lost_at);

    let derived = h.ctx.store().get_session(&switched.id).unwrap();
    assert_eq!(derived.chain, polygon());
    assert_eq!(derived.status, SessionStatus::Disconnected);
    assert!(h.ctx.store().get_wallet_sessions(&original.wallet_id).iter().all(|s| !s.is_live()));
}

#[tokio::test]
async fn failed_switch_keeps_error_status_after_lost_connection() {
    let h = Harness::new(no_recovery());
    let (adapter, original) = connected(&h).await;
    adapter.emit(AdapterEvent::ConnectionLost { reason: "extension reloaded".into() });
    while h.count(EventKind::ConnectionLost) == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.ctx.store().get_session(&original.id).unwrap().status, SessionStatus::Error);

    adapter.script_switch([Err(AdapterError::Rejected("user closed popup".into()))]);
    let err = h
        .switch
        .switch_chain(&original.id, &polygon(), "user", SwitchOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, HingeError::Connection(AdapterError::Rejected(_))));
    assert_eq!(h.ctx.store().get_session(&original.id).unwrap().status, SessionStatus::Error);
    assert_eq!(h.count(EventKind::ChainSwitchFailed), 1);
}
