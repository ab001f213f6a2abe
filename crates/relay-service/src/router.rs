//! Session-scoped fan-out.
//!
//! - A host's relay frames go to every guest in its session
//! - A guest's relay frames go to the host only, and only with `Control`
//! - Key exchange goes to the named identity in the sender's session,
//!   regardless of permission
//!
//! The sender never receives its own frame. Delivery is best-effort: a
//! recipient with a full or closed queue is skipped and counted.

use crate::actors::RegistryActorHandle;
use crate::errors::RelayError;
use crate::observability::metrics;
use crate::protocol::{Role, ServerFrame};
use crate::registry::Participant;

use common::types::ConnectionId;
use tracing::{debug, warn};

/// Per-call delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteReport {
    /// Recipients whose queue accepted the frame.
    pub delivered: usize,
    /// Recipients skipped because their queue was full or closed.
    pub skipped: usize,
}

/// Routes frames between the members of a session.
#[derive(Clone, Debug)]
pub struct SessionRouter {
    registry: RegistryActorHandle,
}

impl SessionRouter {
    /// Create a router over the registry actor.
    #[must_use]
    pub fn new(registry: RegistryActorHandle) -> Self {
        Self { registry }
    }

    /// Forward an opaque relay payload from `sender_id` to its session peers.
    ///
    /// # Errors
    ///
    /// - `RelayError::NotAuthenticated` if the sender has not joined
    /// - `RelayError::PermissionDenied` if the sender is a read-only guest
    pub async fn route(
        &self,
        sender_id: ConnectionId,
        payload: serde_json::Value,
    ) -> Result<RouteReport, RelayError> {
        let sender = self.joined(sender_id).await?;
        if !sender.can_relay() {
            return Err(RelayError::PermissionDenied(
                "Read-only permission".to_string(),
            ));
        }

        let target_role = match sender.role {
            Role::Host => Role::Guest,
            Role::Guest => Role::Host,
        };
        let members = self.registry.members_of(&sender.session_key).await?;
        let frame = ServerFrame::RelayData {
            from_role: sender.role,
            from_user_id: sender.identity.clone(),
            payload,
        };

        let recipients = members
            .iter()
            .filter(|p| p.connection_id() != sender_id && p.role == target_role);
        let report = deliver_all(recipients, &frame);

        metrics::record_frame_routed("relay");
        debug!(
            target: "relay.router",
            connection_id = %sender_id,
            role = sender.role.as_str(),
            delivered = report.delivered,
            skipped = report.skipped,
            "Relay frame routed"
        );
        Ok(report)
    }

    /// Send key material from `sender_id` to every connection of `target_identity`
    /// in the sender's session.
    ///
    /// An absent target is not an error; the report counts zero deliveries.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::NotAuthenticated` if the sender has not joined.
    pub async fn key_exchange(
        &self,
        sender_id: ConnectionId,
        target_identity: &str,
        public_key: String,
    ) -> Result<RouteReport, RelayError> {
        let sender = self.joined(sender_id).await?;
        let members = self.registry.members_of(&sender.session_key).await?;
        let frame = ServerFrame::KeyExchange {
            from_user_id: sender.identity.clone(),
            public_key,
        };

        let recipients = members
            .iter()
            .filter(|p| p.connection_id() != sender_id && p.identity == target_identity);
        let report = deliver_all(recipients, &frame);

        metrics::record_frame_routed("key_exchange");
        debug!(
            target: "relay.router",
            connection_id = %sender_id,
            delivered = report.delivered,
            "Key exchange routed"
        );
        Ok(report)
    }

    async fn joined(&self, connection_id: ConnectionId) -> Result<Participant, RelayError> {
        self.registry
            .lookup_by_handle(connection_id)
            .await?
            .ok_or(RelayError::NotAuthenticated)
    }
}

/// Deliver `frame` to every recipient, counting drops.
pub(crate) fn deliver_all<'a>(
    recipients: impl Iterator<Item = &'a Participant>,
    frame: &ServerFrame,
) -> RouteReport {
    let mut report = RouteReport::default();
    for recipient in recipients {
        match recipient.handle.deliver(frame.clone()) {
            Ok(()) => report.delivered += 1,
            Err(failure) => {
                report.skipped += 1;
                metrics::record_delivery_dropped(failure.as_str());
                warn!(
                    target: "relay.router",
                    connection_id = %recipient.connection_id(),
                    reason = failure.as_str(),
                    "Dropped frame for unwritable recipient"
                );
            }
        }
    }
    report
}
