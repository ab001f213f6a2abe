//! End-to-end tests over a real WebSocket listener.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use relay_service::connection::CloseReason;
use relay_service::protocol::{ClientFrame, Permission, Role, ServerFrame};
use relay_service::transport::{relay_router, TransportSettings, TransportState};
use relay_test_utils::{public_key_of, token_for, MockStore, RelayHarness, TestCode, TestSession};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Serve the relay on an ephemeral port and return its URL.
async fn boot_server(relay: &RelayHarness) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = relay_router(TransportState {
        service: relay.service.clone(),
        settings: TransportSettings::default(),
    });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}/relay")
}

fn harness() -> (TestSession, RelayHarness) {
    let session = TestSession::random("host-1").with_name("Standup");
    let store = MockStore::new()
        .with_session(&session)
        .with_code(TestCode::new("WS0001", &session.key).control().build());
    (session, RelayHarness::new(store))
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn send(ws: &mut WsStream, frame: &ClientFrame) {
    let text = serde_json::to_string(frame).unwrap();
    ws.send(Message::text(text)).await.unwrap();
}

/// Read the next text message as a server frame.
async fn read_frame(ws: &mut WsStream) -> ServerFrame {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => {}
        }
    }
}

/// Read until the server closes, returning the close code.
async fn read_close_code(ws: &mut WsStream) -> Option<u16> {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for close");
        match msg {
            Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
            Some(Ok(_)) => {}
            Some(Err(_)) | None => return None,
        }
    }
}

async fn join_host(ws: &mut WsStream, identity: &str, session_key: &str) -> ServerFrame {
    send(
        ws,
        &ClientFrame::JoinAsHost {
            token: token_for(identity),
            session_id: session_key.to_string(),
        },
    )
    .await;
    read_frame(ws).await
}

async fn join_guest(ws: &mut WsStream, identity: &str, code: &str) -> ServerFrame {
    send(
        ws,
        &ClientFrame::JoinAsGuest {
            token: token_for(identity),
            code: code.to_string(),
            guest_public_key: public_key_of(identity),
        },
    )
    .await;
    read_frame(ws).await
}

#[tokio::test]
async fn test_host_and_guest_relay_over_websocket() {
    let (session, relay) = harness();
    let url = boot_server(&relay).await;

    let mut host = connect(&url).await;
    let joined = join_host(&mut host, "host-1", &session.key).await;
    assert!(matches!(
        joined,
        ServerFrame::JoinResult { role: Role::Host, .. }
    ));

    let mut guest = connect(&url).await;
    let joined = join_guest(&mut guest, "guest-1", "WS0001").await;
    assert_eq!(
        joined,
        ServerFrame::JoinResult {
            role: Role::Guest,
            session_id: session.key.clone(),
            permission: Permission::Control,
            host_connected: true,
            host_public_key: session.host_public_key.clone(),
            host_username: None,
            session_name: Some("Standup".to_string()),
        }
    );
    assert_eq!(
        read_frame(&mut host).await,
        ServerFrame::PeerConnected {
            role: Role::Guest,
            user_id: "guest-1".to_string(),
            permission: Some(Permission::Control),
            public_key: Some(public_key_of("guest-1")),
        }
    );
    assert_eq!(
        read_frame(&mut guest).await,
        ServerFrame::PeerConnected {
            role: Role::Host,
            user_id: "host-1".to_string(),
            permission: None,
            public_key: None,
        }
    );

    let payload = json!({"ciphertext": "AAEC", "nonce": 7});
    send(
        &mut host,
        &ClientFrame::Relay {
            payload: payload.clone(),
        },
    )
    .await;
    assert_eq!(
        read_frame(&mut guest).await,
        ServerFrame::RelayData {
            from_user_id: "host-1".to_string(),
            from_role: Role::Host,
            payload,
        }
    );
}

#[tokio::test]
async fn test_ping_and_malformed_frames() {
    let (_session, relay) = harness();
    let url = boot_server(&relay).await;
    let mut ws = connect(&url).await;

    send(&mut ws, &ClientFrame::Ping).await;
    assert_eq!(read_frame(&mut ws).await, ServerFrame::Pong);

    ws.send(Message::text("not json")).await.unwrap();
    assert!(matches!(
        read_frame(&mut ws).await,
        ServerFrame::Error { code: 1, .. }
    ));

    ws.send(Message::binary(vec![0u8, 1, 2])).await.unwrap();
    assert!(matches!(
        read_frame(&mut ws).await,
        ServerFrame::Error { code: 1, .. }
    ));

    // Still usable
    send(&mut ws, &ClientFrame::Ping).await;
    assert_eq!(read_frame(&mut ws).await, ServerFrame::Pong);
}

#[tokio::test]
async fn test_host_reconnect_closes_old_socket_with_superseded_code() {
    let (session, relay) = harness();
    let url = boot_server(&relay).await;

    let mut first = connect(&url).await;
    join_host(&mut first, "host-1", &session.key).await;

    let mut second = connect(&url).await;
    let joined = join_host(&mut second, "host-1", &session.key).await;
    assert!(matches!(joined, ServerFrame::JoinResult { .. }));

    assert_eq!(
        read_close_code(&mut first).await,
        Some(CloseReason::SupersededByReconnect.code())
    );
}

#[tokio::test]
async fn test_client_disconnect_notifies_peer() {
    let (session, relay) = harness();
    let url = boot_server(&relay).await;

    let mut host = connect(&url).await;
    join_host(&mut host, "host-1", &session.key).await;
    let mut guest = connect(&url).await;
    join_guest(&mut guest, "guest-1", "WS0001").await;
    read_frame(&mut host).await;

    guest.close(None).await.unwrap();
    drop(guest);

    assert_eq!(
        read_frame(&mut host).await,
        ServerFrame::PeerDisconnected {
            role: Role::Guest,
            user_id: "guest-1".to_string(),
        }
    );
}

#[tokio::test]
async fn test_shutdown_closes_sockets_with_going_away() {
    let (session, relay) = harness();
    let url = boot_server(&relay).await;

    let mut host = connect(&url).await;
    join_host(&mut host, "host-1", &session.key).await;

    let closed = relay
        .registry
        .close_all(CloseReason::ServerShutdown)
        .await
        .unwrap();
    assert_eq!(closed, 1);
    assert_eq!(read_close_code(&mut host).await, Some(1001));
}
