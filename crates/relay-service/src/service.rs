//! Per-frame dispatch.
//!
//! The transport hands every inbound text frame to [`RelayService`]. Errors
//! are reported to the originating connection as an `error` frame and never
//! close it.

use crate::connection::ConnectionHandle;
use crate::errors::RelayError;
use crate::lifecycle::{DisconnectCause, LifecycleController};
use crate::observability::metrics;
use crate::protocol::{ClientFrame, ServerFrame};
use crate::router::SessionRouter;

use common::types::ConnectionId;
use tracing::{debug, warn};

/// Dispatches client frames to the lifecycle controller and router.
#[derive(Clone)]
pub struct RelayService {
    lifecycle: LifecycleController,
    router: SessionRouter,
}

impl RelayService {
    /// Create a service over a lifecycle controller and router sharing one registry.
    #[must_use]
    pub fn new(lifecycle: LifecycleController, router: SessionRouter) -> Self {
        Self { lifecycle, router }
    }

    /// Decode and handle one text frame.
    pub async fn handle_text(&self, handle: &ConnectionHandle, text: &str) {
        let result = match ClientFrame::decode(text) {
            Ok(frame) => self.handle_frame(handle, frame).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.reject(handle, &e);
        }
    }

    /// Handle one decoded frame.
    ///
    /// # Errors
    ///
    /// Returns the error to report to the originating connection.
    pub async fn handle_frame(
        &self,
        handle: &ConnectionHandle,
        frame: ClientFrame,
    ) -> Result<(), RelayError> {
        match frame {
            ClientFrame::JoinAsHost { token, session_id } => {
                self.lifecycle
                    .join_as_host(handle, &token, &session_id)
                    .await
            }
            ClientFrame::JoinAsGuest {
                token,
                code,
                guest_public_key,
            } => {
                self.lifecycle
                    .join_as_guest(handle, &token, &code, guest_public_key)
                    .await
            }
            ClientFrame::Relay { payload } => {
                self.router.route(handle.id(), payload).await.map(|_| ())
            }
            ClientFrame::KeyExchange {
                target_user_id,
                public_key,
            } => self
                .router
                .key_exchange(handle.id(), &target_user_id, public_key)
                .await
                .map(|_| ()),
            ClientFrame::Leave => self
                .lifecycle
                .disconnect(handle.id(), DisconnectCause::Left)
                .await
                .map(|_| ()),
            ClientFrame::Ping => {
                handle.deliver_or_drop(ServerFrame::Pong);
                Ok(())
            }
        }
    }

    /// Report `err` to the originating connection.
    pub fn reject(&self, handle: &ConnectionHandle, err: &RelayError) {
        metrics::record_error(err.error_type_label());
        match err {
            RelayError::Collaborator(_) | RelayError::Internal(_) => warn!(
                target: "relay.service",
                connection_id = %handle.id(),
                error = %err,
                "Request failed"
            ),
            _ => debug!(
                target: "relay.service",
                connection_id = %handle.id(),
                reason = err.reason(),
                "Request rejected"
            ),
        }
        handle.deliver_or_drop(ServerFrame::from_error(err));
    }

    /// The transport for `connection_id` closed.
    pub async fn connection_closed(&self, connection_id: ConnectionId) {
        if let Err(e) = self
            .lifecycle
            .disconnect(connection_id, DisconnectCause::Closed)
            .await
        {
            warn!(
                target: "relay.service",
                connection_id = %connection_id,
                error = %e,
                "Disconnect handling failed"
            );
        }
    }
}
