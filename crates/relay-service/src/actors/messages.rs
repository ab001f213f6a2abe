//! Message types for the registry actor.
//!
//! Every request carries a oneshot `respond_to` so callers observe the result
//! of exactly the mutation they asked for.

use crate::connection::CloseReason;
use crate::errors::RelayError;
use crate::presence::JoinGreeting;
use crate::registry::{InsertOutcome, Participant, RegistryStats, RemovalOutcome};

use common::types::ConnectionId;
use tokio::sync::oneshot;

/// Messages handled by the registry actor.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Insert a participant, displacing any previous host, and queue the
    /// join notices.
    Insert {
        participant: Participant,
        greeting: JoinGreeting,
        respond_to: oneshot::Sender<Result<InsertOutcome, RelayError>>,
    },

    /// Remove a participant without closing its transport and notify its
    /// counterparts.
    Remove {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Option<RemovalOutcome>>,
    },

    /// Remove a participant, close its transport and notify its counterparts.
    Evict {
        connection_id: ConnectionId,
        reason: CloseReason,
        respond_to: oneshot::Sender<Option<RemovalOutcome>>,
    },

    /// Look up a participant.
    Lookup {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Option<Participant>>,
    },

    /// Snapshot of a session's members.
    MembersOf {
        session_key: String,
        respond_to: oneshot::Sender<Vec<Participant>>,
    },

    /// The session's host, if connected.
    HostOf {
        session_key: String,
        respond_to: oneshot::Sender<Option<Participant>>,
    },

    /// Connections whose transport is no longer open.
    StaleConnections {
        respond_to: oneshot::Sender<Vec<ConnectionId>>,
    },

    /// Current counts.
    Stats {
        respond_to: oneshot::Sender<RegistryStats>,
    },

    /// Close and remove every participant.
    CloseAll {
        reason: CloseReason,
        respond_to: oneshot::Sender<usize>,
    },
}
