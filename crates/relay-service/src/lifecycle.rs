//! Join, leave and disconnect handling.
//!
//! Collaborator calls (credential, code, session lookups) run on the calling
//! connection's task. Only the final registry mutation goes through the
//! registry actor, so a failed join never changes the registry. The actor
//! also queues the join and departure frames, in mutation order.
//!
//! Guest admission side effects run on a `TaskTracker` after the admission
//! decision:
//! - usage increment: up to 3 attempts, exponential backoff from 100ms,
//!   keyed by the guest's connection id so retries never double count
//! - audit: one attempt, failures logged and counted

use crate::actors::RegistryActorHandle;
use crate::collaborators::{
    normalize_code, AccessGrantResolver, AuditSink, ConnectionAudit, IdentityVerifier,
    SessionDirectory,
};
use crate::connection::{CloseReason, ConnectionHandle};
use crate::errors::{CodeRejection, RelayError};
use crate::observability::metrics;
use crate::presence::JoinGreeting;
use crate::protocol::Role;
use crate::registry::Participant;

use common::types::ConnectionId;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

/// Session name used when the host did not set one.
pub const DEFAULT_SESSION_NAME: &str = "Shared Session";

/// Attempts for the usage increment side effect.
const USAGE_MAX_ATTEMPTS: u32 = 3;

/// Initial delay between usage increment attempts.
const USAGE_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Why a participant is being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    /// The transport closed.
    Closed,
    /// The participant sent `leave`; the transport stays open.
    Left,
    /// The liveness sweep found the transport no longer open.
    Stale,
}

impl DisconnectCause {
    /// Returns the cause as a string for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DisconnectCause::Closed => "closed",
            DisconnectCause::Left => "left",
            DisconnectCause::Stale => "stale",
        }
    }
}

/// External services the lifecycle controller depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub identity: Arc<dyn IdentityVerifier>,
    pub grants: Arc<dyn AccessGrantResolver>,
    pub sessions: Arc<dyn SessionDirectory>,
    pub audit: Arc<dyn AuditSink>,
}

/// Binds connections to sessions and unbinds them.
#[derive(Clone)]
pub struct LifecycleController {
    registry: RegistryActorHandle,
    collaborators: Collaborators,
    side_effects: TaskTracker,
}

impl LifecycleController {
    /// Create a controller over the registry actor.
    #[must_use]
    pub fn new(registry: RegistryActorHandle, collaborators: Collaborators) -> Self {
        Self {
            registry,
            collaborators,
            side_effects: TaskTracker::new(),
        }
    }

    /// Bind `handle` as the host of `session_key`.
    ///
    /// Any current host of the session is displaced and closed with
    /// "superseded by reconnect".
    ///
    /// # Errors
    ///
    /// - `RelayError::InvalidCredential` if the token does not verify
    /// - `RelayError::Unauthorized` if the identity does not own the session
    /// - `RelayError::AlreadyJoined` if this connection already joined
    #[instrument(skip_all, name = "relay.lifecycle.join_host", fields(connection_id = %handle.id()))]
    pub async fn join_as_host(
        &self,
        handle: &ConnectionHandle,
        token: &str,
        session_key: &str,
    ) -> Result<(), RelayError> {
        let start = Instant::now();
        let result = self.admit_host(handle, token, session_key).await;
        record_join(Role::Host, &result, start);
        result
    }

    /// Bind `handle` as a guest using an access code.
    ///
    /// # Errors
    ///
    /// - `RelayError::InvalidCredential` if the token does not verify
    /// - `RelayError::CodeInvalid` if the code is refused, or the session
    ///   ended before the guest could be inserted
    /// - `RelayError::AlreadyJoined` if this connection already joined
    #[instrument(skip_all, name = "relay.lifecycle.join_guest", fields(connection_id = %handle.id()))]
    pub async fn join_as_guest(
        &self,
        handle: &ConnectionHandle,
        token: &str,
        code: &str,
        public_key: String,
    ) -> Result<(), RelayError> {
        let start = Instant::now();
        let result = self.admit_guest(handle, token, code, public_key).await;
        record_join(Role::Guest, &result, start);
        result
    }

    /// Remove a connection's participant and notify its peers.
    ///
    /// Returns `false` for a connection with no participant, so racing close
    /// and sweep paths notify exactly once.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Internal` if the registry actor is gone.
    pub async fn disconnect(
        &self,
        connection_id: ConnectionId,
        cause: DisconnectCause,
    ) -> Result<bool, RelayError> {
        let outcome = match cause {
            DisconnectCause::Stale => {
                self.registry
                    .evict(connection_id, CloseReason::Stale)
                    .await?
            }
            DisconnectCause::Closed | DisconnectCause::Left => {
                self.registry.remove_by_handle(connection_id).await?
            }
        };
        let Some(outcome) = outcome else {
            return Ok(false);
        };

        info!(
            target: "relay.lifecycle",
            connection_id = %connection_id,
            role = outcome.participant.role.as_str(),
            cause = cause.as_str(),
            "Participant removed"
        );
        Ok(true)
    }

    /// Evict every participant whose transport is no longer open.
    ///
    /// Returns the number evicted.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Internal` if the registry actor is gone.
    pub async fn sweep_stale(&self) -> Result<usize, RelayError> {
        let stale = self.registry.stale_connections().await?;
        let mut evicted = 0;
        for connection_id in stale {
            if self.disconnect(connection_id, DisconnectCause::Stale).await? {
                evicted += 1;
            }
        }
        Ok(evicted)
    }

    /// Wait up to `timeout` for in-flight side effects.
    ///
    /// Returns `true` if everything drained. Side effects dispatched later
    /// still run.
    pub async fn drain_side_effects(&self, timeout: Duration) -> bool {
        self.side_effects.close();
        tokio::time::timeout(timeout, self.side_effects.wait())
            .await
            .is_ok()
    }

    /// Number of side-effect tasks still running.
    #[must_use]
    pub fn side_effects_in_flight(&self) -> usize {
        self.side_effects.len()
    }

    async fn admit_host(
        &self,
        handle: &ConnectionHandle,
        token: &str,
        session_key: &str,
    ) -> Result<(), RelayError> {
        let identity = self.collaborators.identity.verify_credential(token).await?;
        if !self
            .collaborators
            .sessions
            .session_owned_by(session_key, &identity)
            .await?
        {
            return Err(RelayError::Unauthorized);
        }

        let outcome = self
            .registry
            .insert(
                Participant::host(handle.clone(), identity, session_key),
                JoinGreeting::default(),
            )
            .await?;

        info!(
            target: "relay.lifecycle",
            connection_id = %handle.id(),
            guests = outcome.peers.iter().filter(|p| p.role == Role::Guest).count(),
            displaced = outcome.displaced.is_some(),
            "Host joined"
        );
        Ok(())
    }

    async fn admit_guest(
        &self,
        handle: &ConnectionHandle,
        token: &str,
        code: &str,
        public_key: String,
    ) -> Result<(), RelayError> {
        let identity = self.collaborators.identity.verify_credential(token).await?;
        let code = normalize_code(code);
        let grant = self.collaborators.grants.resolve_access_code(&code).await?;

        // The session may have ended since the code was evaluated.
        let details = match self
            .collaborators
            .sessions
            .session_details(&grant.session_key)
            .await?
        {
            Some(details) if !details.ended => details,
            _ => return Err(CodeRejection::SessionEnded.into()),
        };

        let greeting = JoinGreeting {
            host_public_key: details.host_public_key,
            host_username: details.host_username,
            session_name: Some(
                details
                    .session_name
                    .unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string()),
            ),
        };
        let outcome = self
            .registry
            .insert(
                Participant::guest(
                    handle.clone(),
                    identity.clone(),
                    grant.session_key.clone(),
                    grant.permission,
                    Some(public_key),
                ),
                greeting,
            )
            .await?;

        self.dispatch_side_effects(
            handle.id(),
            ConnectionAudit {
                session_key: grant.session_key,
                identity,
                code: grant.code,
            },
        );

        info!(
            target: "relay.lifecycle",
            connection_id = %handle.id(),
            host_connected = outcome.peers.iter().any(|p| p.role == Role::Host),
            "Guest joined"
        );
        Ok(())
    }

    fn dispatch_side_effects(&self, admission_id: ConnectionId, audit: ConnectionAudit) {
        let grants = Arc::clone(&self.collaborators.grants);
        let code = audit.code.clone();
        self.side_effects.spawn(async move {
            record_usage_with_retry(grants.as_ref(), &code, admission_id).await;
        });

        let sink = Arc::clone(&self.collaborators.audit);
        self.side_effects.spawn(async move {
            if let Err(e) = sink.record_connection_audit(audit).await {
                warn!(
                    target: "relay.lifecycle",
                    admission_id = %admission_id,
                    error = %e,
                    "Connection audit failed"
                );
                metrics::record_side_effect_failure("audit");
            }
        });
    }
}

async fn record_usage_with_retry(
    grants: &dyn AccessGrantResolver,
    code: &str,
    admission_id: ConnectionId,
) {
    let mut delay = USAGE_BACKOFF_BASE;
    for attempt in 1..=USAGE_MAX_ATTEMPTS {
        match grants.record_usage(code, admission_id).await {
            Ok(()) => return,
            Err(e) if attempt < USAGE_MAX_ATTEMPTS => {
                debug!(
                    target: "relay.lifecycle",
                    admission_id = %admission_id,
                    attempt,
                    error = %e,
                    "Usage increment failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                warn!(
                    target: "relay.lifecycle",
                    admission_id = %admission_id,
                    attempts = USAGE_MAX_ATTEMPTS,
                    error = %e,
                    "Usage increment failed"
                );
                metrics::record_side_effect_failure("usage");
            }
        }
    }
}

fn record_join(role: Role, result: &Result<(), RelayError>, start: Instant) {
    let status = if result.is_ok() { "success" } else { "error" };
    metrics::record_join(role.as_str(), status, start.elapsed());
    if let Err(e) = result {
        debug!(
            target: "relay.lifecycle",
            role = role.as_str(),
            reason = e.reason(),
            error = %e,
            "Join rejected"
        );
    }
}
