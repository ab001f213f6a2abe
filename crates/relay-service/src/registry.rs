//! In-memory connection registry.
//!
//! Three indices are kept consistent by every mutation:
//! - connection id -> `Participant`
//! - session key -> membership (one host slot plus a guest set)
//! - a running host count for O(1) stats
//!
//! `Registry` is plain synchronous state. The registry actor owns the single
//! instance and applies one message at a time, so no mutation is ever
//! observed half-applied.
//!
//! # Invariants
//!
//! 1. A connection id appears in at most one participant entry.
//! 2. Every participant's session has a membership entry containing it.
//! 3. A host insert removes (and, if still open, closes) the previous host
//!    before the new entry is added.
//! 4. Removing the last member of a session removes the membership entry.

use crate::connection::{CloseReason, ConnectionHandle};
use crate::errors::RelayError;
use crate::protocol::{Permission, Role};

use common::types::ConnectionId;
use std::collections::{HashMap, HashSet};
use tokio::time::Instant;

/// A live connection bound to a session.
#[derive(Debug, Clone)]
pub struct Participant {
    /// Transport handle. Closed by the registry on eviction.
    pub handle: ConnectionHandle,
    /// Subject identifier from the identity verifier.
    pub identity: String,
    /// Session this participant belongs to.
    pub session_key: String,
    /// Host or guest.
    pub role: Role,
    /// Always `Control` for hosts.
    pub permission: Permission,
    /// Public key material supplied at join, forwarded to peers untouched.
    pub public_key: Option<String>,
    /// Diagnostics only.
    pub joined_at: Instant,
}

impl Participant {
    /// Build a host participant.
    #[must_use]
    pub fn host(
        handle: ConnectionHandle,
        identity: impl Into<String>,
        session_key: impl Into<String>,
    ) -> Self {
        Self {
            handle,
            identity: identity.into(),
            session_key: session_key.into(),
            role: Role::Host,
            permission: Permission::Control,
            public_key: None,
            joined_at: Instant::now(),
        }
    }

    /// Build a guest participant.
    #[must_use]
    pub fn guest(
        handle: ConnectionHandle,
        identity: impl Into<String>,
        session_key: impl Into<String>,
        permission: Permission,
        public_key: Option<String>,
    ) -> Self {
        Self {
            handle,
            identity: identity.into(),
            session_key: session_key.into(),
            role: Role::Guest,
            permission,
            public_key,
            joined_at: Instant::now(),
        }
    }

    /// Connection id of this participant.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.handle.id()
    }

    /// Whether this participant may send relay frames.
    #[must_use]
    pub fn can_relay(&self) -> bool {
        self.role == Role::Host || self.permission == Permission::Control
    }
}

/// Result of a successful insert.
#[derive(Debug)]
pub struct InsertOutcome {
    /// Previous host removed by this insert, if any.
    pub displaced: Option<Participant>,
    /// Whether the displaced host was still open and received a superseded close.
    pub superseded: bool,
    /// Other session members at the instant of insertion.
    pub peers: Vec<Participant>,
}

/// Result of a removal.
#[derive(Debug)]
pub struct RemovalOutcome {
    /// The removed participant.
    pub participant: Participant,
    /// Remaining session members at the instant of removal.
    pub peers: Vec<Participant>,
}

/// Registry counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RegistryStats {
    /// Distinct sessions with at least one participant.
    pub sessions: usize,
    /// Connected hosts.
    pub hosts: usize,
    /// Connected guests.
    pub guests: usize,
}

#[derive(Debug, Default)]
struct SessionMembership {
    host: Option<ConnectionId>,
    guests: HashSet<ConnectionId>,
}

impl SessionMembership {
    fn is_empty(&self) -> bool {
        self.host.is_none() && self.guests.is_empty()
    }

    fn member_ids(&self) -> impl Iterator<Item = &ConnectionId> {
        self.host.iter().chain(self.guests.iter())
    }
}

/// The registry state.
#[derive(Debug, Default)]
pub struct Registry {
    participants: HashMap<ConnectionId, Participant>,
    sessions: HashMap<String, SessionMembership>,
    host_count: usize,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a participant.
    ///
    /// For a host, the session's current host is removed first and closed
    /// with [`CloseReason::SupersededByReconnect`] if its transport is still
    /// open.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::AlreadyJoined` if the connection already has an
    /// entry. The registry is unchanged in that case.
    pub fn insert(&mut self, participant: Participant) -> Result<InsertOutcome, RelayError> {
        let id = participant.connection_id();
        if self.participants.contains_key(&id) {
            return Err(RelayError::AlreadyJoined);
        }

        let mut displaced = None;
        let mut superseded = false;
        if participant.role == Role::Host {
            let previous = self
                .sessions
                .get(&participant.session_key)
                .and_then(|m| m.host);
            if let Some(previous_id) = previous {
                if let Some(old) = self.remove_entry(previous_id) {
                    if old.handle.is_open() {
                        old.handle.close(CloseReason::SupersededByReconnect);
                        superseded = true;
                    }
                    displaced = Some(old);
                }
            }
        }

        let peers = self.collect_members(&participant.session_key, Some(id));

        let membership = self
            .sessions
            .entry(participant.session_key.clone())
            .or_default();
        match participant.role {
            Role::Host => {
                membership.host = Some(id);
                self.host_count += 1;
            }
            Role::Guest => {
                membership.guests.insert(id);
            }
        }
        self.participants.insert(id, participant);

        Ok(InsertOutcome {
            displaced,
            superseded,
            peers,
        })
    }

    /// Remove a participant without closing its transport.
    pub fn remove_by_handle(&mut self, id: ConnectionId) -> Option<RemovalOutcome> {
        let participant = self.remove_entry(id)?;
        let peers = self.collect_members(&participant.session_key, None);
        Some(RemovalOutcome { participant, peers })
    }

    /// Remove a participant and close its transport with `reason`.
    pub fn evict(&mut self, id: ConnectionId, reason: CloseReason) -> Option<RemovalOutcome> {
        let outcome = self.remove_by_handle(id)?;
        outcome.participant.handle.close(reason);
        Some(outcome)
    }

    /// Look up a participant by connection id.
    #[must_use]
    pub fn lookup_by_handle(&self, id: ConnectionId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    /// All participants in a session.
    #[must_use]
    pub fn members_of(&self, session_key: &str) -> Vec<Participant> {
        self.collect_members(session_key, None)
    }

    /// The session's host, if connected.
    #[must_use]
    pub fn host_of(&self, session_key: &str) -> Option<&Participant> {
        self.sessions
            .get(session_key)
            .and_then(|m| m.host)
            .and_then(|id| self.participants.get(&id))
    }

    /// Connections whose transport is no longer open.
    #[must_use]
    pub fn stale_connections(&self) -> Vec<ConnectionId> {
        self.participants
            .iter()
            .filter(|(_, p)| !p.handle.is_open())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Close and remove every participant. Returns how many were removed.
    pub fn close_all(&mut self, reason: CloseReason) -> usize {
        let removed = self.participants.len();
        for participant in self.participants.values() {
            participant.handle.close(reason);
        }
        self.participants.clear();
        self.sessions.clear();
        self.host_count = 0;
        removed
    }

    /// Current counts.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            sessions: self.sessions.len(),
            hosts: self.host_count,
            guests: self.participants.len().saturating_sub(self.host_count),
        }
    }

    /// Number of participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    fn remove_entry(&mut self, id: ConnectionId) -> Option<Participant> {
        let participant = self.participants.remove(&id)?;

        let now_empty = match self.sessions.get_mut(&participant.session_key) {
            Some(membership) => {
                if membership.host == Some(id) {
                    membership.host = None;
                    self.host_count = self.host_count.saturating_sub(1);
                } else {
                    membership.guests.remove(&id);
                }
                membership.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.sessions.remove(&participant.session_key);
        }

        Some(participant)
    }

    fn collect_members(&self, session_key: &str, exclude: Option<ConnectionId>) -> Vec<Participant> {
        self.sessions
            .get(session_key)
            .map(|membership| {
                membership
                    .member_ids()
                    .filter(|id| Some(**id) != exclude)
                    .filter_map(|id| self.participants.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}
