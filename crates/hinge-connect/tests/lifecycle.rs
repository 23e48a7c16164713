mod common;

use std::time::Duration;

use common::*;
use hinge_connect::{ConnectionStatus, MockConnect};
use hinge_core::{AdapterError, AdapterEvent, ChainId, ConnectOptions, EventKind, HingeError, WalletId};
use hinge_store::SessionStatus;

#[tokio::test]
async fn connect_creates_active_session() {
    let h = Harness::new(no_recovery());
    let adapter = wallet("w1");

    let session = h.manager.connect(adapter.clone(), ConnectOptions::default()).await.unwrap();

    assert_eq!(session.wallet_id, WalletId::from("w1"));
    assert_eq!(session.status, SessionStatus::Connected);
    assert_eq!(session.version, 1);
    assert_eq!(session.accounts.iter().filter(|a| a.is_active).count(), 1);
    assert!(session.provider.is_some());

    let active = h.ctx.store().get_active_session().unwrap();
    assert_eq!(active.id, session.id);

    let record = h.manager.state(&session.wallet_id).unwrap();
    assert_eq!(record.status, ConnectionStatus::Connected);
    assert_eq!(record.attempts, 1);
    assert!(record.last_connected_at.is_some());
    assert!(h.ctx.has_monitor(&session.wallet_id));

    assert_eq!(
        h.kinds(),
        vec![
            EventKind::ConnectionInitiated,
            EventKind::ConnectionEstablishing,
            EventKind::SessionCreated,
            EventKind::ConnectionEstablished,
        ]
    );
    assert!(h.events.lock().iter().all(|e| e.timestamp.is_some()));
}

#[tokio::test]
async fn connecting_twice_reuses_session() {
    let h = Harness::new(no_recovery());
    let adapter = wallet("w1");
    let first = h.manager.connect(adapter.clone(), ConnectOptions::default()).await.unwrap();
    let second = h.manager.connect(adapter.clone(), ConnectOptions::default()).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(adapter.connect_calls(), 1);
}

#[tokio::test]
async fn connect_failure_returns_adapter_error_untouched() {
    let h = Harness::new(no_recovery());
    let adapter = wallet("w1");
    adapter.script_connect([MockConnect::Fail(AdapterError::Rejected("user closed popup".into()))]);

    let err = h.manager.connect(adapter.clone(), ConnectOptions::default()).await.unwrap_err();
    assert_eq!(err, HingeError::Connection(AdapterError::Rejected("user closed popup".into())));
    assert_eq!(err.to_string(), "request rejected by user: user closed popup");

    let record = h.manager.state(&WalletId::from("w1")).unwrap();
    assert_eq!(record.status, ConnectionStatus::Error);
    assert_eq!(record.last_error, Some(err));
    assert!(!h.ctx.has_recovery(&WalletId::from("w1")));

    let failed = h.of(EventKind::ConnectionFailed);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].data["kind"], "rejected");
    assert!(h.ctx.store().is_empty());
}

#[tokio::test]
async fn connect_with_no_accounts_is_a_validation_error() {
    let h = Harness::new(no_recovery());
    let adapter = wallet("w1");
    adapter.script_connect([MockConnect::Succeed {
        accounts: vec![],
        chain: ethereum(),
    }]);
    let err = h.manager.connect(adapter, ConnectOptions::default()).await.unwrap_err();
    assert!(matches!(err, HingeError::Validation(_)));
    assert_eq!(h.manager.state(&WalletId::from("w1")).unwrap().status, ConnectionStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn recovery_stops_after_max_attempts() {
    let h = Harness::new(exponential(3));
    let adapter = wallet("w1");
    adapter.set_connect_default(MockConnect::Fail(AdapterError::Unavailable("extension locked".into())));

    assert!(h.manager.connect(adapter.clone(), ConnectOptions::default()).await.is_err());
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(adapter.connect_calls(), 3);
    assert_eq!(h.count(EventKind::RecoveryFailed), 1);

    let delays: Vec<u64> = h
        .of(EventKind::RecoveryScheduled)
        .iter()
        .map(|e| e.data["delayMs"].as_u64().unwrap())
        .collect();
    assert_eq!(delays, vec![1_000, 2_000]);

    let record = h.manager.state(&WalletId::from("w1")).unwrap();
    assert_eq!(record.status, ConnectionStatus::Error);
    assert_eq!(record.attempts, 3);
    assert!(matches!(record.last_error, Some(HingeError::RecoveryExhausted { attempts: 3, .. })));

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(adapter.connect_calls(), 3);
    assert_eq!(h.count(EventKind::RecoveryFailed), 1);
}

#[tokio::test(start_paused = true)]
async fn recovery_restores_connection() {
    let h = Harness::new(exponential(5));
    let adapter = wallet("w1");
    adapter.script_connect([
        MockConnect::Fail(AdapterError::Timeout),
        MockConnect::Fail(AdapterError::Timeout),
    ]);

    assert!(h.manager.connect(adapter.clone(), ConnectOptions::default()).await.is_err());
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(adapter.connect_calls(), 3);
    let record = h.manager.state(&WalletId::from("w1")).unwrap();
    assert_eq!(record.status, ConnectionStatus::Connected);
    assert_eq!(record.attempts, 3);
    assert!(record.last_error.is_none());
    assert_eq!(h.count(EventKind::ConnectionRestored), 1);
    assert_eq!(h.count(EventKind::RecoveryFailed), 0);
    assert!(h.ctx.store().get_active_session().is_some());
    assert!(!h.ctx.has_recovery(&WalletId::from("w1")));
}

#[tokio::test(start_paused = true)]
async fn immediate_strategy_does_not_wait() {
    let mut opts = exponential(2);
    opts.strategy = hinge_settings::RecoveryStrategy::Immediate;
    let h = Harness::new(opts);
    let adapter = wallet("w1");
    adapter.script_connect([MockConnect::Fail(AdapterError::Timeout)]);

    let started = tokio::time::Instant::now();
    assert!(h.manager.connect(adapter.clone(), ConnectOptions::default()).await.is_err());
    while h.manager.state(&WalletId::from("w1")).unwrap().status != ConnectionStatus::Connected {
        tokio::task::yield_now().await;
    }
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(h.of(EventKind::RecoveryScheduled)[0].data["delayMs"], 0);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_recovery() {
    let h = Harness::new(exponential(5));
    let adapter = wallet("w1");
    adapter.set_connect_default(MockConnect::Fail(AdapterError::Timeout));
    let w = WalletId::from("w1");

    assert!(h.manager.connect(adapter.clone(), ConnectOptions::default()).await.is_err());
    assert!(h.ctx.has_recovery(&w));
    h.manager.disconnect(&w, Some("user".into())).await.unwrap();
    tokio::time::sleep(Duration::from_secs(300)).await;

    assert_eq!(adapter.connect_calls(), 1);
    let record = h.manager.state(&w).unwrap();
    assert_eq!(record.status, ConnectionStatus::Disconnected);
    assert_eq!(record.attempts, 1, "diagnostics survive disconnect");
    assert_eq!(record.last_error, Some(HingeError::Connection(AdapterError::Timeout)));
}

#[tokio::test]
async fn stop_recovery_is_idempotent() {
    let h = Harness::new(exponential(5));
    let adapter = wallet("w1");
    adapter.set_connect_default(MockConnect::Fail(AdapterError::Timeout));
    let w = WalletId::from("w1");

    assert!(h.manager.connect(adapter, ConnectOptions::default()).await.is_err());
    assert!(h.manager.stop_recovery(&w));
    assert!(!h.manager.stop_recovery(&w));
    assert!(!h.manager.stop_recovery(&WalletId::from("unknown")));
}

#[tokio::test]
async fn disconnect_ends_sessions_and_reports_reason() {
    let h = Harness::new(no_recovery());
    let adapter = wallet("w1");
    let session = h.manager.connect(adapter.clone(), ConnectOptions::default()).await.unwrap();
    h.clear_events();

    h.manager.disconnect(&session.wallet_id, Some("dapp closed".into())).await.unwrap();

    assert_eq!(adapter.disconnect_calls(), 1);
    assert_eq!(h.manager.state(&session.wallet_id).unwrap().status, ConnectionStatus::Disconnected);
    assert!(!h.ctx.has_monitor(&session.wallet_id));
    let ended = h.ctx.store().get_session(&session.id).unwrap();
    assert_eq!(ended.status, SessionStatus::Disconnected);
    assert!(h.ctx.store().get_active_session().is_none());

    assert_eq!(h.kinds(), vec![EventKind::SessionEnded, EventKind::ConnectionLost]);
    let lost = &h.of(EventKind::ConnectionLost)[0];
    assert_eq!(lost.data["reason"], "dapp closed");
    assert_eq!(lost.data["requested"], true);
}

#[tokio::test]
async fn disconnect_settles_even_when_adapter_fails() {
    let h = Harness::new(no_recovery());
    let adapter = wallet("w1");
    adapter.set_disconnect_result(Err(AdapterError::Unavailable("device unplugged".into())));
    let session = h.manager.connect(adapter.clone(), ConnectOptions::default()).await.unwrap();

    let err = h.manager.disconnect(&session.wallet_id, None).await.unwrap_err();
    assert_eq!(err, HingeError::Connection(AdapterError::Unavailable("device unplugged".into())));

    let record = h.manager.state(&session.wallet_id).unwrap();
    assert_eq!(record.status, ConnectionStatus::Disconnected);
    assert_eq!(record.last_error, Some(err));
    assert!(!h.ctx.store().get_session(&session.id).unwrap().is_live());

    // A fresh connect works from the settled state.
    let again = h.manager.connect(adapter.clone(), ConnectOptions::default()).await.unwrap();
    assert_ne!(again.id, session.id);
    assert_eq!(h.manager.state(&session.wallet_id).unwrap().attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_waits_for_inflight_connect() {
    let h = Harness::new(no_recovery());
    let adapter = wallet("w1");
    adapter.set_latency(Duration::from_millis(200));
    let w = WalletId::from("w1");

    let connect = {
        let manager = h.manager.clone();
        let adapter = adapter.clone();
        tokio::spawn(async move { manager.connect(adapter, ConnectOptions::default()).await })
    };
    tokio::task::yield_now().await;
    assert!(h.ctx.locks().is_locked(&w));

    let disconnect = {
        let manager = h.manager.clone();
        let w = w.clone();
        tokio::spawn(async move { manager.disconnect(&w, None).await })
    };

    let session = connect.await.unwrap().unwrap();
    disconnect.await.unwrap().unwrap();

    assert_eq!(adapter.max_in_flight(), 1);
    let kinds = h.kinds();
    let established = kinds.iter().position(|k| *k == EventKind::ConnectionEstablished).unwrap();
    let lost = kinds.iter().position(|k| *k == EventKind::ConnectionLost).unwrap();
    assert!(established < lost);
    assert_eq!(h.manager.state(&w).unwrap().status, ConnectionStatus::Disconnected);
    assert!(!h.ctx.store().get_session(&session.id).unwrap().is_live());
}

#[tokio::test(start_paused = true)]
async fn operations_on_one_wallet_never_overlap() {
    let h = Harness::new(no_recovery());
    let adapter = wallet("w1");
    adapter.set_latency(Duration::from_millis(50));
    let w = WalletId::from("w1");

    let mut tasks = Vec::new();
    for i in 0..6 {
        let manager = h.manager.clone();
        let adapter = adapter.clone();
        let w = w.clone();
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                manager.connect(adapter, ConnectOptions::default()).await.map(|_| ())
            } else {
                manager.disconnect(&w, None).await
            }
        }));
    }
    for t in tasks {
        t.await.unwrap().unwrap();
    }
    assert_eq!(adapter.max_in_flight(), 1);
    assert_eq!(adapter.connect_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn different_wallets_run_in_parallel() {
    let h = Harness::new(no_recovery());
    let a = wallet("a");
    let b = wallet("b");
    a.set_latency(Duration::from_secs(1));
    b.set_latency(Duration::from_secs(1));

    let started = tokio::time::Instant::now();
    let (ra, rb) = tokio::join!(
        h.manager.connect(a.clone(), ConnectOptions::default()),
        h.manager.connect(b.clone(), ConnectOptions::default()),
    );
    ra.unwrap();
    rb.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn lost_connection_is_recovered() {
    let h = Harness::new(exponential(3));
    let adapter = wallet("w1");
    let first = h.manager.connect(adapter.clone(), ConnectOptions::default()).await.unwrap();
    h.clear_events();

    adapter.emit(AdapterEvent::ConnectionLost { reason: "extension reloaded".into() });
    tokio::time::sleep(Duration::from_secs(30)).await;

    let lost = h.of(EventKind::ConnectionLost);
    assert_eq!(lost.len(), 1);
    assert_eq!(lost[0].data["requested"], false);
    assert_eq!(h.count(EventKind::SessionStatusChanged), 1);
    assert_eq!(h.count(EventKind::ConnectionRestored), 1);

    let record = h.manager.state(&first.wallet_id).unwrap();
    assert_eq!(record.status, ConnectionStatus::Connected);
    assert_eq!(record.attempts, 1, "a lost connection starts a new streak");

    let active = h.ctx.store().get_active_session().unwrap();
    assert_ne!(active.id, first.id);
    let old = h.ctx.store().get_session(&first.id).unwrap();
    assert_eq!(old.status, SessionStatus::Disconnected);
}

#[tokio::test]
async fn adapter_notifications_are_forwarded() {
    let h = Harness::new(no_recovery());
    let adapter = wallet("w1");
    let session = h.manager.connect(adapter.clone(), ConnectOptions::default()).await.unwrap();
    h.clear_events();

    adapter.emit(AdapterEvent::AccountsChanged { addresses: vec!["0xBBB2".into()] });
    adapter.emit(AdapterEvent::ChainChanged { chain_id: ChainId::from("eip155:10") });
    while h.events.lock().len() < 2 {
        tokio::task::yield_now().await;
    }

    let accounts = &h.of(EventKind::AccountsChanged)[0];
    assert_eq!(accounts.session_id.as_ref(), Some(&session.id));
    assert_eq!(accounts.data["addresses"][0], "0xBBB2");
    let chain = &h.of(EventKind::ChainChanged)[0];
    assert_eq!(chain.chain_id, Some(ChainId::from("eip155:10")));
    assert_eq!(chain.data["from"], "eip155:1");

    // Notifications alone never replace the session.
    assert_eq!(h.ctx.store().get_active_session().unwrap().id, session.id);
}

#[tokio::test]
async fn manual_recovery_runs_one_attempt() {
    let h = Harness::new(no_recovery());
    let adapter = wallet("w1");
    adapter.script_connect([MockConnect::Fail(AdapterError::Timeout)]);
    let w = WalletId::from("w1");

    assert!(h.manager.connect(adapter.clone(), ConnectOptions::default()).await.is_err());
    let session = h.manager.start_manual_recovery(&w).await.unwrap();

    assert_eq!(session.wallet_id, w);
    assert_eq!(adapter.connect_calls(), 2);
    let record = h.manager.state(&w).unwrap();
    assert_eq!(record.status, ConnectionStatus::Connected);
    assert_eq!(record.attempts, 2);
    assert_eq!(h.count(EventKind::ConnectionRestored), 1);
}

#[tokio::test]
async fn manual_recovery_needs_a_known_wallet() {
    let h = Harness::new(no_recovery());
    let err = h.manager.start_manual_recovery(&WalletId::from("ghost")).await.unwrap_err();
    assert!(matches!(err, HingeError::NotFound(_)));
}

#[tokio::test]
async fn remove_tears_everything_down() {
    let h = Harness::new(no_recovery());
    let adapter = wallet("w1");
    let session = h.manager.connect(adapter, ConnectOptions::default()).await.unwrap();
    let w = session.wallet_id.clone();

    let record = h.manager.remove(&w).await.unwrap();
    assert_eq!(record.status, ConnectionStatus::Connected);
    assert!(h.manager.state(&w).is_none());
    assert!(h.ctx.adapter(&w).is_none());
    assert!(!h.ctx.has_monitor(&w));
    assert!(h.ctx.locks().is_empty());
    assert!(h.manager.remove(&w).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn connect_queued_behind_remove_stays_serialized() {
    let h = Harness::new(no_recovery());
    let adapter = wallet("w1");
    adapter.set_latency(Duration::from_millis(100));
    let w = WalletId::from("w1");

    let spawn_connect = |h: &Harness| {
        let manager = h.manager.clone();
        let adapter = adapter.clone();
        tokio::spawn(async move { manager.connect(adapter, ConnectOptions::default()).await })
    };

    let first = spawn_connect(&h);
    tokio::task::yield_now().await;
    let remove = {
        let manager = h.manager.clone();
        let w = w.clone();
        tokio::spawn(async move { manager.remove(&w).await })
    };
    tokio::task::yield_now().await;
    let queued = spawn_connect(&h);
    tokio::task::yield_now().await;

    first.await.unwrap().unwrap();
    assert!(remove.await.unwrap().is_some());
    // Arrives after the removal, while the queued connect is still pending.
    let late = spawn_connect(&h);

    let queued = queued.await.unwrap().unwrap();
    let late = late.await.unwrap().unwrap();
    assert_eq!(late.id, queued.id);
    assert_eq!(adapter.max_in_flight(), 1);
    assert_eq!(adapter.connect_calls(), 2);
    assert_eq!(h.manager.state(&w).unwrap().status, ConnectionStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_fails_the_attempt() {
    let h = Harness::new(no_recovery());
    let adapter = wallet("w1");
    adapter.set_latency(Duration::from_secs(30));
    let w = WalletId::from("w1");
    let options = ConnectOptions {
        timeout: Some(Duration::from_secs(5)),
        ..ConnectOptions::default()
    };

    let started = tokio::time::Instant::now();
    let err = h.manager.connect(adapter.clone(), options).await.unwrap_err();
    assert_eq!(err, HingeError::Connection(AdapterError::Timeout));
    assert!(started.elapsed() < Duration::from_secs(30));

    let record = h.manager.state(&w).unwrap();
    assert_eq!(record.status, ConnectionStatus::Error);
    assert_eq!(record.last_error, Some(err));
    assert_eq!(h.of(EventKind::ConnectionFailed)[0].data["kind"], "timeout");
    assert!(h.ctx.store().is_empty());

    adapter.set_latency(Duration::ZERO);
    h.manager.connect(adapter.clone(), ConnectOptions::default()).await.unwrap();
    assert_eq!(adapter.max_in_flight(), 1);
}
