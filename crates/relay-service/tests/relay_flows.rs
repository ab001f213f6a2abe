//! End-to-end join, relay and permission flows through the service layer.
//!
//! Connections are in-memory outbound queues; frames enter through the same
//! text-frame path the WebSocket reader uses.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use relay_service::connection::CloseReason;
use relay_service::protocol::{ClientFrame, Permission, Role, ServerFrame};
use relay_test_utils::{
    public_key_of, token_for, MockStore, RelayHarness, TestCode, TestSession,
};
use serde_json::json;

const CONTROL_CODE: &str = "CTRL01";
const READ_CODE: &str = "READ01";

fn session_with_codes() -> (TestSession, MockStore) {
    let session = TestSession::random("host-1")
        .with_name("Design review")
        .with_host_username("octo");
    let store = MockStore::new()
        .with_session(&session)
        .with_code(TestCode::new(CONTROL_CODE, &session.key).control().build())
        .with_code(TestCode::new(READ_CODE, &session.key).build());
    (session, store)
}

fn relay_payload(payload: serde_json::Value) -> ClientFrame {
    ClientFrame::Relay { payload }
}

/// Whether a participant that received `frames`, in order, believes
/// `user_id` in `role` is connected.
fn believes_present(frames: &[ServerFrame], role: Role, user_id: &str) -> bool {
    frames.iter().fold(false, |present, frame| match frame {
        ServerFrame::JoinResult { host_connected, .. } if role == Role::Host => *host_connected,
        ServerFrame::PeerConnected { role: r, user_id: u, .. } if *r == role && u == user_id => {
            true
        }
        ServerFrame::PeerDisconnected { role: r, user_id: u } if *r == role && u == user_id => {
            false
        }
        _ => present,
    })
}

fn error_reason(frame: &ServerFrame) -> Option<&str> {
    match frame {
        ServerFrame::Error { reason, .. } => Some(reason.as_str()),
        _ => None,
    }
}

// ============================================================================
// Joins
// ============================================================================

#[tokio::test]
async fn test_host_join_result() {
    let (session, store) = session_with_codes();
    let relay = RelayHarness::new(store);
    let mut host = relay.connect();

    relay.join_host(&host, "host-1", &session.key).await;

    assert_eq!(
        host.next_frame().await,
        ServerFrame::JoinResult {
            role: Role::Host,
            session_id: session.key.clone(),
            permission: Permission::Control,
            host_connected: true,
            host_public_key: None,
            host_username: None,
            session_name: None,
        }
    );
    let stats = relay.registry.stats().await.unwrap();
    assert_eq!((stats.sessions, stats.hosts, stats.guests), (1, 1, 0));
}

#[tokio::test]
async fn test_host_join_rejected_for_non_owner() {
    let (session, store) = session_with_codes();
    let relay = RelayHarness::new(store);
    let mut intruder = relay.connect();

    relay.join_host(&intruder, "intruder", &session.key).await;

    let frame = intruder.next_frame().await;
    assert!(matches!(frame, ServerFrame::Error { code: 3, .. }));
    assert_eq!(error_reason(&frame), Some("unauthorized"));
    assert_eq!(relay.registry.stats().await.unwrap().hosts, 0);
}

#[tokio::test]
async fn test_invalid_token_rejected() {
    let (session, store) = session_with_codes();
    let relay = RelayHarness::new(store);
    let mut conn = relay.connect();

    relay
        .send(
            &conn,
            &ClientFrame::JoinAsHost {
                token: "not-a-token".to_string(),
                session_id: session.key.clone(),
            },
        )
        .await;

    let frame = conn.next_frame().await;
    assert!(matches!(frame, ServerFrame::Error { code: 2, .. }));
    assert_eq!(error_reason(&frame), Some("invalid_credential"));
}

#[tokio::test]
async fn test_guest_join_without_host() {
    let (session, store) = session_with_codes();
    let relay = RelayHarness::new(store);
    let mut guest = relay.connect();

    // Codes are normalized before lookup
    relay.join_guest(&guest, "guest-1", " ctrl01 ").await;

    assert_eq!(
        guest.next_frame().await,
        ServerFrame::JoinResult {
            role: Role::Guest,
            session_id: session.key.clone(),
            permission: Permission::Control,
            host_connected: false,
            host_public_key: Some("host-public-key".to_string()),
            host_username: Some("octo".to_string()),
            session_name: Some("Design review".to_string()),
        }
    );
    assert!(guest.drain().is_empty(), "no peerConnected without a host");
}

#[tokio::test]
async fn test_guest_join_defaults_session_name() {
    let session = TestSession::random("host-1");
    let store = MockStore::new()
        .with_session(&session)
        .with_code(TestCode::new("ABC", &session.key).build());
    let relay = RelayHarness::new(store);
    let mut guest = relay.connect();

    relay.join_guest(&guest, "guest-1", "ABC").await;

    assert!(matches!(
        guest.next_frame().await,
        ServerFrame::JoinResult { session_name: Some(ref name), .. } if name == "Shared Session"
    ));
}

#[tokio::test]
async fn test_guest_then_host_exchange_peer_connected() {
    let (session, store) = session_with_codes();
    let relay = RelayHarness::new(store);
    let mut guest = relay.guest("guest-1", READ_CODE).await;

    let mut host = relay.connect();
    relay.join_host(&host, "host-1", &session.key).await;

    let host_frames = host.drain();
    assert_eq!(host_frames.len(), 2);
    assert!(matches!(host_frames.first(), Some(ServerFrame::JoinResult { .. })));
    assert_eq!(
        host_frames.get(1),
        Some(&ServerFrame::PeerConnected {
            role: Role::Guest,
            user_id: "guest-1".to_string(),
            permission: Some(Permission::Read),
            public_key: Some(public_key_of("guest-1")),
        })
    );
    assert_eq!(
        guest.drain(),
        vec![ServerFrame::PeerConnected {
            role: Role::Host,
            user_id: "host-1".to_string(),
            permission: None,
            public_key: None,
        }]
    );
}

#[tokio::test]
async fn test_host_then_guest_exchange_peer_connected() {
    let (session, store) = session_with_codes();
    let relay = RelayHarness::new(store);
    let mut host = relay.host("host-1", &session.key).await;

    let mut guest = relay.connect();
    relay.join_guest(&guest, "guest-1", CONTROL_CODE).await;

    let guest_frames = guest.drain();
    assert!(matches!(
        guest_frames.first(),
        Some(ServerFrame::JoinResult { host_connected: true, .. })
    ));
    assert!(matches!(
        guest_frames.get(1),
        Some(ServerFrame::PeerConnected { role: Role::Host, user_id, .. }) if user_id == "host-1"
    ));
    assert_eq!(
        host.drain(),
        vec![ServerFrame::PeerConnected {
            role: Role::Guest,
            user_id: "guest-1".to_string(),
            permission: Some(Permission::Control),
            public_key: Some(public_key_of("guest-1")),
        }]
    );
}

#[tokio::test]
async fn test_second_join_on_same_connection_conflicts() {
    let (session, store) = session_with_codes();
    let relay = RelayHarness::new(store);
    let mut host = relay.host("host-1", &session.key).await;

    relay.join_guest(&host, "host-1", READ_CODE).await;

    let frame = host.next_frame().await;
    assert!(matches!(frame, ServerFrame::Error { code: 5, .. }));
    let stats = relay.registry.stats().await.unwrap();
    assert_eq!((stats.hosts, stats.guests), (1, 0));
}

// ============================================================================
// Relay and permissions
// ============================================================================

#[tokio::test]
async fn test_host_relay_reaches_all_guests_only() {
    let (session, store) = session_with_codes();
    let other = TestSession::random("host-2");
    store.insert_session(&other);
    store.insert_code(TestCode::new("OTHER1", &other.key).build());
    let relay = RelayHarness::new(store);

    let mut host = relay.host("host-1", &session.key).await;
    let mut g1 = relay.guest("guest-1", READ_CODE).await;
    let mut g2 = relay.guest("guest-2", CONTROL_CODE).await;
    let mut outsider = relay.guest("guest-3", "OTHER1").await;
    host.drain();

    relay
        .send(&host, &relay_payload(json!({"ciphertext": "AAAA", "iv": "BBBB"})))
        .await;

    let expected = ServerFrame::RelayData {
        from_role: Role::Host,
        from_user_id: "host-1".to_string(),
        payload: json!({"ciphertext": "AAAA", "iv": "BBBB"}),
    };
    assert_eq!(g1.drain(), vec![expected.clone()]);
    assert_eq!(g2.drain(), vec![expected]);
    assert!(host.drain().is_empty(), "sender never receives its own frame");
    assert!(outsider.drain().is_empty());
}

#[tokio::test]
async fn test_control_guest_reaches_host_only() {
    let (session, store) = session_with_codes();
    let relay = RelayHarness::new(store);
    let mut host = relay.host("host-1", &session.key).await;
    let controller = relay.guest("guest-1", CONTROL_CODE).await;
    let mut watcher = relay.guest("guest-2", READ_CODE).await;
    host.drain();

    relay.send(&controller, &relay_payload(json!({"event": "click"}))).await;

    assert_eq!(
        host.drain(),
        vec![ServerFrame::RelayData {
            from_role: Role::Guest,
            from_user_id: "guest-1".to_string(),
            payload: json!({"event": "click"}),
        }]
    );
    assert!(watcher.drain().is_empty());
}

#[tokio::test]
async fn test_read_guest_is_always_denied() {
    let (session, store) = session_with_codes();
    let relay = RelayHarness::new(store);
    let mut host = relay.host("host-1", &session.key).await;
    let mut watcher = relay.guest("guest-1", READ_CODE).await;
    host.drain();

    for payload in [json!("x"), json!({"event": "click"}), json!(null)] {
        relay.send(&watcher, &relay_payload(payload)).await;
        let frame = watcher.next_frame().await;
        assert_eq!(
            frame,
            ServerFrame::Error {
                code: 3,
                reason: "permission_denied".to_string(),
                message: "Read-only permission".to_string(),
            }
        );
    }
    assert!(host.drain().is_empty());
}

#[tokio::test]
async fn test_relay_before_join_is_not_authenticated() {
    let (_session, store) = session_with_codes();
    let relay = RelayHarness::new(store);
    let mut conn = relay.connect();

    relay.send(&conn, &relay_payload(json!("early"))).await;

    let frame = conn.next_frame().await;
    assert!(matches!(frame, ServerFrame::Error { code: 2, .. }));
    assert_eq!(error_reason(&frame), Some("not_authenticated"));
}

#[tokio::test]
async fn test_key_exchange_between_read_guest_and_host() {
    let (session, store) = session_with_codes();
    let relay = RelayHarness::new(store);
    let mut host = relay.host("host-1", &session.key).await;
    let mut watcher = relay.guest("guest-1", READ_CODE).await;
    let mut bystander = relay.guest("guest-2", READ_CODE).await;
    host.drain();

    relay
        .send(
            &watcher,
            &ClientFrame::KeyExchange {
                target_user_id: "host-1".to_string(),
                public_key: "guest-ecdh".to_string(),
            },
        )
        .await;
    relay
        .send(
            &host,
            &ClientFrame::KeyExchange {
                target_user_id: "guest-1".to_string(),
                public_key: "host-ecdh".to_string(),
            },
        )
        .await;

    assert_eq!(
        host.drain(),
        vec![ServerFrame::KeyExchange {
            from_user_id: "guest-1".to_string(),
            public_key: "guest-ecdh".to_string(),
        }]
    );
    assert_eq!(
        watcher.drain(),
        vec![ServerFrame::KeyExchange {
            from_user_id: "host-1".to_string(),
            public_key: "host-ecdh".to_string(),
        }]
    );
    assert!(bystander.drain().is_empty());
}

#[tokio::test]
async fn test_malformed_frames_keep_connection_usable() {
    let (session, store) = session_with_codes();
    let relay = RelayHarness::new(store);
    let mut conn = relay.connect();

    for text in ["not json", r#"{"type":"teleport"}"#, r#"{"type":"joinAsHost"}"#] {
        relay.send_text(&conn, text).await;
        let frame = conn.next_frame().await;
        assert!(matches!(frame, ServerFrame::Error { code: 1, .. }), "{text}");
    }

    relay.send(&conn, &ClientFrame::Ping).await;
    assert_eq!(conn.next_frame().await, ServerFrame::Pong);

    relay.join_host(&conn, "host-1", &session.key).await;
    assert!(matches!(conn.next_frame().await, ServerFrame::JoinResult { .. }));
    assert!(conn.close_reason().is_none());
}

// ============================================================================
// Departures and reconnects
// ============================================================================

#[tokio::test]
async fn test_host_disconnect_keeps_guests_and_rejoin_relinks() {
    let (session, store) = session_with_codes();
    let relay = RelayHarness::new(store);
    let host = relay.host("host-1", &session.key).await;
    let mut guest = relay.guest("guest-1", CONTROL_CODE).await;

    relay.close(&host).await;

    assert_eq!(
        guest.drain(),
        vec![ServerFrame::PeerDisconnected {
            role: Role::Host,
            user_id: "host-1".to_string(),
        }]
    );
    let stats = relay.registry.stats().await.unwrap();
    assert_eq!((stats.hosts, stats.guests), (0, 1));

    let mut new_host = relay.connect();
    relay.join_host(&new_host, "host-1", &session.key).await;

    let frames = new_host.drain();
    assert!(matches!(frames.first(), Some(ServerFrame::JoinResult { .. })));
    assert!(matches!(
        frames.get(1),
        Some(ServerFrame::PeerConnected { role: Role::Guest, user_id, .. }) if user_id == "guest-1"
    ));
    assert!(matches!(
        guest.drain().as_slice(),
        [ServerFrame::PeerConnected { role: Role::Host, .. }]
    ));

    // Control relay flows again
    relay.send(&guest, &relay_payload(json!("after rejoin"))).await;
    assert_eq!(new_host.drain().len(), 1);
}

#[tokio::test]
async fn test_guest_leave_notifies_host_and_keeps_transport() {
    let (session, store) = session_with_codes();
    let relay = RelayHarness::new(store);
    let mut host = relay.host("host-1", &session.key).await;
    let mut guest = relay.guest("guest-1", READ_CODE).await;
    host.drain();

    relay.send(&guest, &ClientFrame::Leave).await;

    assert_eq!(
        host.drain(),
        vec![ServerFrame::PeerDisconnected {
            role: Role::Guest,
            user_id: "guest-1".to_string(),
        }]
    );
    assert!(guest.handle.is_open(), "leave does not close the transport");
    assert!(guest.close_reason().is_none());

    // The later transport close is a no-op
    relay.close(&guest).await;
    assert!(host.drain().is_empty());
}

#[tokio::test]
async fn test_host_reconnect_displaces_old_host() {
    let (session, store) = session_with_codes();
    let relay = RelayHarness::new(store);
    let mut old_host = relay.host("host-1", &session.key).await;
    let mut guest = relay.guest("guest-1", READ_CODE).await;

    let new_host = relay.host("host-1", &session.key).await;

    assert_eq!(
        old_host.close_reason(),
        Some(CloseReason::SupersededByReconnect)
    );
    // Guests see the new host and no departure
    assert!(matches!(
        guest.drain().as_slice(),
        [ServerFrame::PeerConnected { role: Role::Host, .. }]
    ));

    // The displaced transport closing later notifies nobody
    relay.close(&old_host).await;
    assert!(guest.drain().is_empty());
    assert_eq!(relay.registry.stats().await.unwrap().hosts, 1);
    assert!(relay
        .registry
        .lookup_by_handle(new_host.id())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_concurrent_host_joins_leave_exactly_one_host() {
    const JOINS: usize = 16;

    let (session, store) = session_with_codes();
    let relay = std::sync::Arc::new(RelayHarness::new(store));

    let mut conns = Vec::new();
    for _ in 0..JOINS {
        conns.push(relay.connect());
    }

    let mut tasks = Vec::new();
    for conn in &conns {
        let relay = std::sync::Arc::clone(&relay);
        let handle = conn.handle.clone();
        let key = session.key.clone();
        tasks.push(tokio::spawn(async move {
            let frame = ClientFrame::JoinAsHost {
                token: relay_test_utils::token_for("host-1"),
                session_id: key,
            };
            let text = serde_json::to_string(&frame).unwrap();
            relay.service.handle_text(&handle, &text).await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let stats = relay.registry.stats().await.unwrap();
    assert_eq!(stats.hosts, 1);

    let superseded = conns
        .iter_mut()
        .map(|c| c.close_reason() == Some(CloseReason::SupersededByReconnect))
        .filter(|superseded| *superseded)
        .count();
    assert_eq!(superseded, JOINS - 1);
}

#[tokio::test]
async fn test_host_hears_guest_departure_after_last_connection() {
    let (session, store) = session_with_codes();
    let relay = RelayHarness::new(store);
    let mut host = relay.host("host-1", &session.key).await;
    let phone = relay.guest("guest-1", CONTROL_CODE).await;
    let tablet = relay.guest("guest-1", CONTROL_CODE).await;
    assert_eq!(host.drain().len(), 2, "one peerConnected per connection");

    relay.close(&phone).await;
    assert!(host.drain().is_empty(), "guest-1 is still connected");

    relay.close(&tablet).await;
    assert_eq!(
        host.drain(),
        vec![ServerFrame::PeerDisconnected {
            role: Role::Guest,
            user_id: "guest-1".to_string(),
        }]
    );
}

// ============================================================================
// Presence ordering under races
// ============================================================================

const RACE_ROUNDS: usize = 200;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_guest_join_racing_host_close_never_leaves_phantom_host() {
    for _ in 0..RACE_ROUNDS {
        let (session, store) = session_with_codes();
        let relay = RelayHarness::new(store);
        let host = relay.host("host-1", &session.key).await;
        let mut guest = relay.connect();

        let join = {
            let service = relay.service.clone();
            let handle = guest.handle.clone();
            let text = serde_json::to_string(&ClientFrame::JoinAsGuest {
                token: token_for("guest-1"),
                code: CONTROL_CODE.to_string(),
                guest_public_key: public_key_of("guest-1"),
            })
            .unwrap();
            tokio::spawn(async move { service.handle_text(&handle, &text).await })
        };
        let close = {
            let service = relay.service.clone();
            let host_id = host.id();
            tokio::spawn(async move { service.connection_closed(host_id).await })
        };
        join.await.unwrap();
        close.await.unwrap();

        let frames = guest.drain();
        assert!(
            matches!(frames.first(), Some(ServerFrame::JoinResult { .. })),
            "{frames:?}"
        );
        assert_eq!(relay.registry.stats().await.unwrap().hosts, 0);
        assert!(
            !believes_present(&frames, Role::Host, "host-1"),
            "guest still believes the host is connected: {frames:?}"
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_host_join_racing_guest_close_never_leaves_phantom_guest() {
    for _ in 0..RACE_ROUNDS {
        let (session, store) = session_with_codes();
        let relay = RelayHarness::new(store);
        let guest = relay.guest("guest-1", CONTROL_CODE).await;
        let mut host = relay.connect();

        let join = {
            let service = relay.service.clone();
            let handle = host.handle.clone();
            let text = serde_json::to_string(&ClientFrame::JoinAsHost {
                token: token_for("host-1"),
                session_id: session.key.clone(),
            })
            .unwrap();
            tokio::spawn(async move { service.handle_text(&handle, &text).await })
        };
        let close = {
            let service = relay.service.clone();
            let guest_id = guest.id();
            tokio::spawn(async move { service.connection_closed(guest_id).await })
        };
        join.await.unwrap();
        close.await.unwrap();

        let frames = host.drain();
        assert!(
            matches!(frames.first(), Some(ServerFrame::JoinResult { .. })),
            "{frames:?}"
        );
        assert_eq!(relay.registry.stats().await.unwrap().guests, 0);
        assert!(
            !believes_present(&frames, Role::Guest, "guest-1"),
            "host still believes the guest is connected: {frames:?}"
        );
    }
}
