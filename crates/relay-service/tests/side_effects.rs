//! Guest admission side effects: usage counting and connection audit.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use relay_service::collaborators::ConnectionAudit;
use relay_service::protocol::ServerFrame;
use relay_test_utils::{MockStore, RelayHarness, TestCode, TestSession};

const CODE: &str = "JOIN42";

fn session_and_store() -> (TestSession, MockStore) {
    let session = TestSession::random("host-1");
    let store = MockStore::new()
        .with_session(&session)
        .with_code(TestCode::new(CODE, &session.key).build());
    (session, store)
}

fn rejection(frame: &ServerFrame) -> (i32, &str) {
    match frame {
        ServerFrame::Error { code, reason, .. } => (*code, reason.as_str()),
        other => panic!("expected an error frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_admission_counts_one_use_and_audits() {
    let (session, store) = session_and_store();
    let relay = RelayHarness::new(store.clone());

    let _guest = relay.guest("guest-1", "join42").await;
    relay.settle_side_effects().await;

    assert_eq!(store.current_uses(CODE), Some(1));
    assert_eq!(store.usage_attempts(), 1);
    assert_eq!(
        store.audit_log(),
        vec![ConnectionAudit {
            session_key: session.key.clone(),
            identity: "guest-1".to_string(),
            code: CODE.to_string(),
        }]
    );
}

#[tokio::test]
async fn test_usage_retries_count_exactly_once() {
    let (_session, store) = session_and_store();
    let store = store.failing_usage(2);
    let relay = RelayHarness::new(store.clone());

    let _guest = relay.guest("guest-1", CODE).await;
    relay.settle_side_effects().await;

    assert_eq!(store.usage_attempts(), 3);
    assert_eq!(store.current_uses(CODE), Some(1));
}

#[tokio::test]
async fn test_usage_gives_up_after_three_attempts_without_failing_join() {
    let session = TestSession::random("host-1");
    let store = MockStore::new()
        .with_session(&session)
        .with_code(TestCode::new(CODE, &session.key).build())
        .failing_usage(5);
    let relay = RelayHarness::new(store.clone());

    let guest = relay.guest("guest-1", CODE).await;
    relay.settle_side_effects().await;

    assert_eq!(store.usage_attempts(), 3);
    assert_eq!(store.current_uses(CODE), Some(0));
    assert!(relay
        .registry
        .lookup_by_handle(guest.id())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_audit_failure_does_not_affect_join() {
    let session = TestSession::random("host-1");
    let store = MockStore::new()
        .with_session(&session)
        .with_code(TestCode::new(CODE, &session.key).control().build())
        .failing_audit();
    let relay = RelayHarness::new(store.clone());
    let mut host = relay.host("host-1", &session.key).await;

    let _guest = relay.guest("guest-1", CODE).await;
    relay.settle_side_effects().await;

    assert_eq!(store.audit_attempts(), 1);
    assert!(store.audit_log().is_empty());
    assert_eq!(store.current_uses(CODE), Some(1));
    assert!(matches!(
        host.drain().as_slice(),
        [ServerFrame::PeerConnected { .. }]
    ));
}

#[tokio::test]
async fn test_session_ending_during_join_admits_nobody() {
    let session = TestSession::random("host-1");
    let store = MockStore::new()
        .with_session(&session)
        .with_code(TestCode::new(CODE, &session.key).build())
        .ending_session_after_resolve(&session.key);
    let relay = RelayHarness::new(store.clone());
    let mut guest = relay.connect();

    relay.join_guest(&guest, "guest-1", CODE).await;

    assert_eq!(rejection(&guest.next_frame().await), (3, "session_ended"));
    relay.settle_side_effects().await;
    assert_eq!(relay.registry.stats().await.unwrap().guests, 0);
    assert_eq!(store.usage_attempts(), 0);
    assert_eq!(store.audit_attempts(), 0);
    assert_eq!(store.current_uses(CODE), Some(0));
}

#[tokio::test]
async fn test_revoked_code_admits_nobody_and_writes_no_audit() {
    let session = TestSession::random("host-1");
    let store = MockStore::new()
        .with_session(&session)
        .with_code(TestCode::new(CODE, &session.key).revoked().build());
    let relay = RelayHarness::new(store.clone());
    let mut guest = relay.connect();

    relay.join_guest(&guest, "guest-1", CODE).await;

    assert_eq!(rejection(&guest.next_frame().await), (3, "code_revoked"));
    relay.settle_side_effects().await;
    assert!(relay
        .registry
        .lookup_by_handle(guest.id())
        .await
        .unwrap()
        .is_none());
    assert_eq!(store.audit_attempts(), 0);
    assert_eq!(store.usage_attempts(), 0);
}

#[tokio::test]
async fn test_code_rejections_are_distinct() {
    let session = TestSession::random("host-1");
    let ended = TestSession::random("host-2").ended();
    let store = MockStore::new()
        .with_session(&session)
        .with_session(&ended)
        .with_code(TestCode::new("OLD", &session.key).expired().build())
        .with_code(TestCode::new("FULL", &session.key).max_uses(2).used(2).build())
        .with_code(TestCode::new("DONE", &ended.key).build());
    let relay = RelayHarness::new(store);

    for (code, expected) in [
        ("MISSING", (4, "code_not_found")),
        ("OLD", (3, "code_expired")),
        ("FULL", (3, "code_uses_exhausted")),
        ("DONE", (3, "session_ended")),
    ] {
        let mut guest = relay.connect();
        relay.join_guest(&guest, "guest-1", code).await;
        assert_eq!(rejection(&guest.next_frame().await), expected, "code {code}");
    }
    assert_eq!(relay.registry.stats().await.unwrap().guests, 0);
}

#[tokio::test]
async fn test_use_limit_reached_by_earlier_admissions() {
    let session = TestSession::random("host-1");
    let store = MockStore::new()
        .with_session(&session)
        .with_code(TestCode::new(CODE, &session.key).max_uses(1).build());
    let relay = RelayHarness::new(store.clone());

    let _first = relay.guest("guest-1", CODE).await;
    relay.settle_side_effects().await;

    let mut second = relay.connect();
    relay.join_guest(&second, "guest-2", CODE).await;
    assert_eq!(
        rejection(&second.next_frame().await),
        (3, "code_uses_exhausted")
    );
}

#[tokio::test]
async fn test_store_outage_is_an_internal_error() {
    let session = TestSession::random("host-1");
    let store = MockStore::new().with_session(&session).unavailable();
    let relay = RelayHarness::new(store);
    let mut guest = relay.connect();

    relay.join_guest(&guest, "guest-1", CODE).await;

    let frame = guest.next_frame().await;
    assert_eq!(rejection(&frame), (6, "internal"));
    assert!(matches!(
        frame,
        ServerFrame::Error { ref message, .. } if message == "An internal error occurred"
    ));
}
