//! Wire frames exchanged over the relay transport.
//!
//! Frames are JSON objects tagged by a camelCase `type` field. Relay payloads
//! are carried as opaque JSON values and never inspected.

use crate::errors::RelayError;
use serde::{Deserialize, Serialize};

/// Participant role within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The single controlling endpoint of a session.
    Host,
    /// A peer admitted via an access code.
    Guest,
}

impl Role {
    /// Returns the role as a string for metric labels and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::Guest => "guest",
        }
    }
}

/// What a participant may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Observe only.
    Read,
    /// May send control-affecting relay frames.
    Control,
}

impl Permission {
    /// Parses the persisted form (`read` / `control`), case-insensitively.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "read" => Some(Permission::Read),
            "control" => Some(Permission::Control),
            _ => None,
        }
    }
}

/// Frames a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Bind this connection as the host of `session_id`.
    #[serde(rename_all = "camelCase")]
    JoinAsHost { token: String, session_id: String },

    /// Bind this connection as a guest using a one-time access code.
    #[serde(rename_all = "camelCase")]
    JoinAsGuest {
        token: String,
        code: String,
        guest_public_key: String,
    },

    /// Forward an opaque payload to the session peers.
    Relay { payload: serde_json::Value },

    /// Send public key material to one peer, by identity.
    #[serde(rename_all = "camelCase")]
    KeyExchange {
        target_user_id: String,
        public_key: String,
    },

    /// Leave the session without closing the connection.
    Leave,

    /// Application-level keepalive.
    Ping,
}

impl ClientFrame {
    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::MalformedFrame` for invalid JSON, an unknown
    /// `type`, or missing fields.
    pub fn decode(text: &str) -> Result<Self, RelayError> {
        serde_json::from_str(text).map_err(|e| RelayError::MalformedFrame(e.to_string()))
    }
}

/// Frames the relay sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    /// Successful join.
    #[serde(rename_all = "camelCase")]
    JoinResult {
        role: Role,
        session_id: String,
        permission: Permission,
        host_connected: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host_public_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host_username: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_name: Option<String>,
    },

    /// A peer became reachable.
    #[serde(rename_all = "camelCase")]
    PeerConnected {
        role: Role,
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        permission: Option<Permission>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        public_key: Option<String>,
    },

    /// A peer left or its transport was lost.
    #[serde(rename_all = "camelCase")]
    PeerDisconnected { role: Role, user_id: String },

    /// Relayed payload from a session peer.
    #[serde(rename_all = "camelCase")]
    RelayData {
        from_role: Role,
        from_user_id: String,
        payload: serde_json::Value,
    },

    /// Key material from a peer.
    #[serde(rename_all = "camelCase")]
    KeyExchange {
        from_user_id: String,
        public_key: String,
    },

    /// Structured error result for the originating connection.
    Error {
        code: i32,
        reason: String,
        message: String,
    },

    /// Reply to `ping`.
    Pong,
}

impl ServerFrame {
    /// Build an `error` frame from a relay error.
    #[must_use]
    pub fn from_error(err: &RelayError) -> Self {
        ServerFrame::Error {
            code: err.error_code(),
            reason: err.reason().to_string(),
            message: err.client_message(),
        }
    }

    /// Encode as JSON text.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Internal` if serialization fails.
    pub fn encode(&self) -> Result<String, RelayError> {
        serde_json::to_string(self)
            .map_err(|e| RelayError::Internal(format!("frame encode failed: {e}")))
    }
}
