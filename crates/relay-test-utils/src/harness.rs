//! In-process relay harness.
//!
//! Wires the registry actor, lifecycle controller, router and service over
//! the in-memory collaborators. Connections are bare outbound queues; tests
//! drive them through the same text-frame entry point the WebSocket reader
//! uses.

use crate::fixtures::token_for;
use crate::mock_identity::MockIdentityVerifier;
use crate::mock_store::MockStore;

use common::types::ConnectionId;
use relay_service::actors::RegistryActorHandle;
use relay_service::connection::{CloseReason, ConnectionHandle, Outbound};
use relay_service::lifecycle::{Collaborators, LifecycleController};
use relay_service::protocol::{ClientFrame, ServerFrame};
use relay_service::router::SessionRouter;
use relay_service::service::RelayService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Outbound queue size for test connections.
pub const TEST_QUEUE_SIZE: usize = 64;

/// How long `next_frame` waits before failing the test.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(2);

/// A relay wired over in-memory collaborators.
pub struct RelayHarness {
    pub registry: RegistryActorHandle,
    pub lifecycle: LifecycleController,
    pub service: RelayService,
    pub store: MockStore,
    pub identity: Arc<MockIdentityVerifier>,
    pub cancel_token: CancellationToken,
    registry_task: Option<JoinHandle<()>>,
}

impl RelayHarness {
    /// Build a relay over `store` with an accepting identity verifier.
    #[must_use]
    pub fn new(store: MockStore) -> Self {
        Self::with_identity(store, MockIdentityVerifier::accepting())
    }

    /// Build a relay over `store` and `identity`.
    #[must_use]
    pub fn with_identity(store: MockStore, identity: MockIdentityVerifier) -> Self {
        let cancel_token = CancellationToken::new();
        let (registry, registry_task) = RegistryActorHandle::spawn(cancel_token.child_token());
        let identity = Arc::new(identity);
        let store_arc = Arc::new(store.clone());

        let collaborators = Collaborators {
            identity: identity.clone(),
            grants: store_arc.clone(),
            sessions: store_arc.clone(),
            audit: store_arc,
        };
        let lifecycle = LifecycleController::new(registry.clone(), collaborators);
        let service = RelayService::new(lifecycle.clone(), SessionRouter::new(registry.clone()));

        Self {
            registry,
            lifecycle,
            service,
            store,
            identity,
            cancel_token,
            registry_task: Some(registry_task),
        }
    }

    /// Open a connection that has not joined anything.
    #[must_use]
    pub fn connect(&self) -> TestConnection {
        self.connect_with_queue(TEST_QUEUE_SIZE)
    }

    /// Open a connection with a specific outbound queue size.
    #[must_use]
    pub fn connect_with_queue(&self, queue_size: usize) -> TestConnection {
        let (handle, rx) = ConnectionHandle::channel(queue_size);
        TestConnection {
            handle,
            rx,
            close_reason: None,
        }
    }

    /// Send a client frame as JSON text.
    pub async fn send(&self, conn: &TestConnection, frame: &ClientFrame) {
        let text = serde_json::to_string(frame).unwrap();
        self.service.handle_text(&conn.handle, &text).await;
    }

    /// Send raw text.
    pub async fn send_text(&self, conn: &TestConnection, text: &str) {
        self.service.handle_text(&conn.handle, text).await;
    }

    /// Connect and join `session_key` as `identity`, returning the
    /// connection with its join frames drained.
    pub async fn host(&self, identity: &str, session_key: &str) -> TestConnection {
        let mut conn = self.connect();
        self.join_host(&conn, identity, session_key).await;
        let frame = conn.next_frame().await;
        assert!(
            matches!(frame, ServerFrame::JoinResult { .. }),
            "expected joinResult for host {identity}, got {frame:?}"
        );
        conn.drain();
        conn
    }

    /// Connect and join as a guest with `code`, returning the connection
    /// with its join frames drained.
    pub async fn guest(&self, identity: &str, code: &str) -> TestConnection {
        let mut conn = self.connect();
        self.join_guest(&conn, identity, code).await;
        let frame = conn.next_frame().await;
        assert!(
            matches!(frame, ServerFrame::JoinResult { .. }),
            "expected joinResult for guest {identity}, got {frame:?}"
        );
        conn.drain();
        conn
    }

    pub async fn join_host(&self, conn: &TestConnection, identity: &str, session_key: &str) {
        self.send(
            conn,
            &ClientFrame::JoinAsHost {
                token: token_for(identity),
                session_id: session_key.to_string(),
            },
        )
        .await;
    }

    pub async fn join_guest(&self, conn: &TestConnection, identity: &str, code: &str) {
        self.send(
            conn,
            &ClientFrame::JoinAsGuest {
                token: token_for(identity),
                code: code.to_string(),
                guest_public_key: public_key_of(identity),
            },
        )
        .await;
    }

    /// Simulate the transport closing.
    pub async fn close(&self, conn: &TestConnection) {
        conn.handle.mark_closed();
        self.service.connection_closed(conn.id()).await;
    }

    /// Wait for admission side effects to finish.
    pub async fn settle_side_effects(&self) {
        assert!(
            self.lifecycle.drain_side_effects(Duration::from_secs(10)).await,
            "side effects did not drain"
        );
    }

    /// Stop the registry actor and wait for it.
    pub async fn shutdown(mut self) {
        self.cancel_token.cancel();
        if let Some(task) = self.registry_task.take() {
            task.await.unwrap();
        }
    }
}

impl Drop for RelayHarness {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Public key the harness sends for a guest identity.
#[must_use]
pub fn public_key_of(identity: &str) -> String {
    format!("pk-{identity}")
}

/// One side of a test connection: the handle the relay holds and the
/// receiving end of its outbound queue.
pub struct TestConnection {
    pub handle: ConnectionHandle,
    rx: mpsc::Receiver<Outbound>,
    close_reason: Option<CloseReason>,
}

impl TestConnection {
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    /// Take every frame queued so far. A queued close is remembered.
    pub fn drain(&mut self) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            match item {
                Outbound::Frame(frame) => frames.push(frame),
                Outbound::Close(reason) => self.close_reason = Some(reason),
            }
        }
        frames
    }

    /// Wait for the next frame.
    ///
    /// # Panics
    ///
    /// Panics if nothing arrives within [`FRAME_TIMEOUT`] or the queue closes.
    pub async fn next_frame(&mut self) -> ServerFrame {
        loop {
            let item = tokio::time::timeout(FRAME_TIMEOUT, self.rx.recv())
                .await
                .expect("timed out waiting for a frame")
                .expect("outbound queue closed");
            match item {
                Outbound::Frame(frame) => return frame,
                Outbound::Close(reason) => self.close_reason = Some(reason),
            }
        }
    }

    /// Close reason queued by the relay, if any.
    pub fn close_reason(&mut self) -> Option<CloseReason> {
        let _ = self.drain();
        self.close_reason
    }

    /// Drop the receiving side without telling the relay, as a transport
    /// that vanished would.
    pub fn vanish(self) -> ConnectionHandle {
        self.handle
    }
}
