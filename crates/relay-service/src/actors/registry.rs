//! `RegistryActor` - sole owner of the connection registry.
//!
//! Every registry read and mutation is a message to this actor. Requests are
//! applied one at a time in arrival order, so concurrent joins, leaves and
//! sweeps for the same session never interleave, and a host displacement
//! (remove old host, close it, add new host) is observed as a single step.
//!
//! Join and departure frames are queued inside the same step as the
//! mutation, so every participant observes presence in mutation order.
//! Registry gauges are republished after each mutation.

use crate::connection::CloseReason;
use crate::errors::RelayError;
use crate::observability::metrics;
use crate::presence::{self, JoinGreeting};
use crate::registry::{
    InsertOutcome, Participant, Registry, RegistryStats, RemovalOutcome,
};

use super::messages::RegistryMessage;
use super::metrics::MailboxMonitor;

use common::types::ConnectionId;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// Handle to the `RegistryActor`.
///
/// Cheap to clone. All methods are async and return results via oneshot
/// channels.
#[derive(Clone, Debug)]
pub struct RegistryActorHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl RegistryActorHandle {
    /// Spawn the registry actor.
    ///
    /// The actor stops when `cancel_token` is cancelled or every handle is
    /// dropped.
    #[must_use]
    pub fn spawn(cancel_token: CancellationToken) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new());

        let actor = RegistryActor {
            receiver,
            cancel_token: cancel_token.clone(),
            registry: Registry::new(),
            mailbox: Arc::clone(&mailbox),
        };
        let task_handle = tokio::spawn(actor.run());

        let handle = Self {
            sender,
            cancel_token,
            mailbox,
        };
        (handle, task_handle)
    }

    /// Insert a participant. A host insert displaces the session's previous host.
    ///
    /// The joiner's `joinResult` (carrying `greeting`) and the `peerConnected`
    /// frames are queued before this returns.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::AlreadyJoined` if the connection is already
    /// registered, or `RelayError::Internal` if the actor is gone.
    pub async fn insert(
        &self,
        participant: Participant,
        greeting: JoinGreeting,
    ) -> Result<InsertOutcome, RelayError> {
        self.request(|respond_to| RegistryMessage::Insert {
            participant,
            greeting,
            respond_to,
        })
        .await?
    }

    /// Remove a participant without closing its transport.
    ///
    /// Counterparts get `peerDisconnected` before this returns.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Internal` if the actor is gone.
    pub async fn remove_by_handle(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<RemovalOutcome>, RelayError> {
        self.request(|respond_to| RegistryMessage::Remove {
            connection_id,
            respond_to,
        })
        .await
    }

    /// Remove a participant and close its transport with `reason`.
    ///
    /// Counterparts get `peerDisconnected` before this returns.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Internal` if the actor is gone.
    pub async fn evict(
        &self,
        connection_id: ConnectionId,
        reason: CloseReason,
    ) -> Result<Option<RemovalOutcome>, RelayError> {
        self.request(|respond_to| RegistryMessage::Evict {
            connection_id,
            reason,
            respond_to,
        })
        .await
    }

    /// Look up a participant by connection id.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Internal` if the actor is gone.
    pub async fn lookup_by_handle(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<Participant>, RelayError> {
        self.request(|respond_to| RegistryMessage::Lookup {
            connection_id,
            respond_to,
        })
        .await
    }

    /// Snapshot of a session's members.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Internal` if the actor is gone.
    pub async fn members_of(&self, session_key: &str) -> Result<Vec<Participant>, RelayError> {
        let session_key = session_key.to_string();
        self.request(|respond_to| RegistryMessage::MembersOf {
            session_key,
            respond_to,
        })
        .await
    }

    /// The session's host, if connected.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Internal` if the actor is gone.
    pub async fn host_of(&self, session_key: &str) -> Result<Option<Participant>, RelayError> {
        let session_key = session_key.to_string();
        self.request(|respond_to| RegistryMessage::HostOf {
            session_key,
            respond_to,
        })
        .await
    }

    /// Connections whose transport is no longer open.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Internal` if the actor is gone.
    pub async fn stale_connections(&self) -> Result<Vec<ConnectionId>, RelayError> {
        self.request(|respond_to| RegistryMessage::StaleConnections { respond_to })
            .await
    }

    /// Current registry counts.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Internal` if the actor is gone.
    pub async fn stats(&self) -> Result<RegistryStats, RelayError> {
        self.request(|respond_to| RegistryMessage::Stats { respond_to })
            .await
    }

    /// Close and remove every participant. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Internal` if the actor is gone.
    pub async fn close_all(&self, reason: CloseReason) -> Result<usize, RelayError> {
        self.request(|respond_to| RegistryMessage::CloseAll { reason, respond_to })
            .await
    }

    /// Cancel the actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Mailbox monitor shared with the actor.
    #[must_use]
    pub fn mailbox(&self) -> &MailboxMonitor {
        &self.mailbox
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryMessage,
    ) -> Result<T, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox.record_enqueue();
        if let Err(e) = self.sender.send(build(tx)).await {
            self.mailbox.record_send_failed();
            return Err(RelayError::Internal(format!("channel send failed: {e}")));
        }

        rx.await
            .map_err(|e| RelayError::Internal(format!("response receive failed: {e}")))
    }
}

/// The `RegistryActor` implementation.
struct RegistryActor {
    receiver: mpsc::Receiver<RegistryMessage>,
    cancel_token: CancellationToken,
    registry: Registry,
    mailbox: Arc<MailboxMonitor>,
}

impl RegistryActor {
    /// Run the actor message loop.
    #[instrument(skip_all, name = "relay.actor.registry")]
    async fn run(mut self) {
        info!(target: "relay.actor.registry", "RegistryActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "relay.actor.registry",
                        "RegistryActor received cancellation signal"
                    );
                    let closed = self.registry.close_all(CloseReason::ServerShutdown);
                    if closed > 0 {
                        metrics::record_eviction(CloseReason::ServerShutdown.metric_label(), closed);
                        metrics::set_registry_stats(self.registry.stats());
                    }
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            info!(
                                target: "relay.actor.registry",
                                "RegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "relay.actor.registry",
            participants_remaining = self.registry.len(),
            messages_processed = self.mailbox.messages_processed(),
            peak_mailbox_depth = self.mailbox.peak_depth(),
            "RegistryActor stopped"
        );
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::Insert {
                participant,
                greeting,
                respond_to,
            } => {
                let result = self.insert(participant, greeting);
                let _ = respond_to.send(result);
            }

            RegistryMessage::Remove {
                connection_id,
                respond_to,
            } => {
                let outcome = self.registry.remove_by_handle(connection_id);
                if let Some(removed) = &outcome {
                    presence::announce_departure(removed);
                    metrics::set_registry_stats(self.registry.stats());
                }
                let _ = respond_to.send(outcome);
            }

            RegistryMessage::Evict {
                connection_id,
                reason,
                respond_to,
            } => {
                let outcome = self.registry.evict(connection_id, reason);
                if let Some(removed) = &outcome {
                    debug!(
                        target: "relay.actor.registry",
                        connection_id = %connection_id,
                        role = removed.participant.role.as_str(),
                        reason = reason.as_str(),
                        "Participant evicted"
                    );
                    presence::announce_departure(removed);
                    metrics::record_eviction(reason.metric_label(), 1);
                    metrics::set_registry_stats(self.registry.stats());
                }
                let _ = respond_to.send(outcome);
            }

            RegistryMessage::Lookup {
                connection_id,
                respond_to,
            } => {
                let participant = self.registry.lookup_by_handle(connection_id).cloned();
                let _ = respond_to.send(participant);
            }

            RegistryMessage::MembersOf {
                session_key,
                respond_to,
            } => {
                let _ = respond_to.send(self.registry.members_of(&session_key));
            }

            RegistryMessage::HostOf {
                session_key,
                respond_to,
            } => {
                let _ = respond_to.send(self.registry.host_of(&session_key).cloned());
            }

            RegistryMessage::StaleConnections { respond_to } => {
                let _ = respond_to.send(self.registry.stale_connections());
            }

            RegistryMessage::Stats { respond_to } => {
                let _ = respond_to.send(self.registry.stats());
            }

            RegistryMessage::CloseAll { reason, respond_to } => {
                let closed = self.registry.close_all(reason);
                if closed > 0 {
                    info!(
                        target: "relay.actor.registry",
                        closed,
                        reason = reason.as_str(),
                        "Closed all participants"
                    );
                    metrics::record_eviction(reason.metric_label(), closed);
                }
                metrics::set_registry_stats(self.registry.stats());
                let _ = respond_to.send(closed);
            }
        }
    }

    fn insert(
        &mut self,
        participant: Participant,
        greeting: JoinGreeting,
    ) -> Result<InsertOutcome, RelayError> {
        let joined = participant.clone();
        let outcome = self.registry.insert(participant)?;
        presence::announce_join(&joined, &outcome, greeting);
        if let Some(displaced) = &outcome.displaced {
            info!(
                target: "relay.actor.registry",
                session_key = %displaced.session_key,
                displaced_connection_id = %displaced.connection_id(),
                superseded = outcome.superseded,
                "Host displaced by newer connection"
            );
            metrics::record_eviction(CloseReason::SupersededByReconnect.metric_label(), 1);
        }
        metrics::set_registry_stats(self.registry.stats());
        Ok(outcome)
    }
}
