//! Join and departure notices.
//!
//! The registry actor queues these in the same step as the membership change
//! they describe. Every participant therefore sees presence frames in
//! mutation order: a guest that joins while the host is leaving receives
//! either `hostConnected: false`, or `hostConnected: true` followed by the
//! host's `peerDisconnected`.

use crate::protocol::{Permission, Role, ServerFrame};
use crate::registry::{InsertOutcome, Participant, RemovalOutcome};
use crate::router::deliver_all;

/// Session details echoed to a joining guest in its `joinResult`.
///
/// Hosts join with the default, empty greeting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinGreeting {
    pub host_public_key: Option<String>,
    pub host_username: Option<String>,
    pub session_name: Option<String>,
}

/// Queue the joiner's `joinResult` and the `peerConnected` frames in both
/// directions.
pub(crate) fn announce_join(joined: &Participant, outcome: &InsertOutcome, greeting: JoinGreeting) {
    match joined.role {
        Role::Host => announce_host_join(joined, outcome),
        Role::Guest => announce_guest_join(joined, outcome, greeting),
    }
}

fn announce_host_join(host: &Participant, outcome: &InsertOutcome) {
    host.handle.deliver_or_drop(ServerFrame::JoinResult {
        role: Role::Host,
        session_id: host.session_key.clone(),
        permission: Permission::Control,
        host_connected: true,
        host_public_key: None,
        host_username: None,
        session_name: None,
    });

    let guests = outcome.peers.iter().filter(|p| p.role == Role::Guest);
    deliver_all(
        guests.clone(),
        &ServerFrame::PeerConnected {
            role: Role::Host,
            user_id: host.identity.clone(),
            permission: None,
            public_key: host.public_key.clone(),
        },
    );
    for guest in guests {
        host.handle.deliver_or_drop(peer_connected(guest));
    }
}

fn announce_guest_join(guest: &Participant, outcome: &InsertOutcome, greeting: JoinGreeting) {
    let host = outcome.peers.iter().find(|p| p.role == Role::Host);
    guest.handle.deliver_or_drop(ServerFrame::JoinResult {
        role: Role::Guest,
        session_id: guest.session_key.clone(),
        permission: guest.permission,
        host_connected: host.is_some(),
        host_public_key: greeting.host_public_key,
        host_username: greeting.host_username,
        session_name: greeting.session_name,
    });

    if let Some(host) = host {
        host.handle.deliver_or_drop(peer_connected(guest));
        guest.handle.deliver_or_drop(ServerFrame::PeerConnected {
            role: Role::Host,
            user_id: host.identity.clone(),
            permission: None,
            public_key: host.public_key.clone(),
        });
    }
}

/// Queue `peerDisconnected` for the departed participant's counterparts.
///
/// Guests hear about the host. The host hears about a guest identity once its
/// last connection in the session is gone.
pub(crate) fn announce_departure(outcome: &RemovalOutcome) {
    let departed = &outcome.participant;
    let counterpart = match departed.role {
        Role::Host => Role::Guest,
        Role::Guest => {
            let still_present = outcome
                .peers
                .iter()
                .any(|p| p.role == Role::Guest && p.identity == departed.identity);
            if still_present {
                return;
            }
            Role::Host
        }
    };
    deliver_all(
        outcome.peers.iter().filter(|p| p.role == counterpart),
        &ServerFrame::PeerDisconnected {
            role: departed.role,
            user_id: departed.identity.clone(),
        },
    );
}

fn peer_connected(guest: &Participant) -> ServerFrame {
    ServerFrame::PeerConnected {
        role: Role::Guest,
        user_id: guest.identity.clone(),
        permission: Some(guest.permission),
        public_key: guest.public_key.clone(),
    }
}
