//! Relay error types.
//!
//! Every error maps to a signaling error code and a stable reason string that
//! is sent to the originating connection in an `error` frame. Internal details
//! are logged server-side but never exposed to clients.

use thiserror::Error;

/// Why an access code was refused.
///
/// Reasons are surfaced distinctly to the caller but never change routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodeRejection {
    /// No code with that value exists.
    #[error("Code not found")]
    NotFound,

    /// The code was revoked by the host.
    #[error("Code has been revoked")]
    Revoked,

    /// The code's expiry time has passed.
    #[error("Code has expired")]
    Expired,

    /// The code reached its maximum number of uses.
    #[error("Code usage limit reached")]
    UsesExhausted,

    /// The session the code grants access to has ended.
    #[error("Session has ended")]
    SessionEnded,
}

impl CodeRejection {
    /// Stable reason string for the wire and for logs.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            CodeRejection::NotFound => "code_not_found",
            CodeRejection::Revoked => "code_revoked",
            CodeRejection::Expired => "code_expired",
            CodeRejection::UsesExhausted => "code_uses_exhausted",
            CodeRejection::SessionEnded => "session_ended",
        }
    }
}

/// Relay error type.
///
/// Maps to signaling `ErrorCode` values:
/// - `MalformedFrame`: `INVALID_REQUEST` (1)
/// - `InvalidCredential`, `NotAuthenticated`: `UNAUTHORIZED` (2)
/// - `Unauthorized`, `PermissionDenied`, most `CodeInvalid`: `FORBIDDEN` (3)
/// - `CodeInvalid(NotFound)`: `NOT_FOUND` (4)
/// - `AlreadyJoined`: `CONFLICT` (5)
/// - `Collaborator`, `Internal`: `INTERNAL_ERROR` (6)
#[derive(Debug, Error)]
pub enum RelayError {
    /// Bearer credential failed verification.
    #[error("Invalid credential")]
    InvalidCredential,

    /// Credential is valid but not entitled to the session.
    #[error("Not entitled to this session")]
    Unauthorized,

    /// Access code refused.
    #[error("Access code rejected: {0}")]
    CodeInvalid(CodeRejection),

    /// Relay or key-exchange frame sent before joining.
    #[error("Connection has not joined a session")]
    NotAuthenticated,

    /// Read-only guest attempted a control relay.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Inbound frame could not be decoded.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Connection is already bound to a participant.
    #[error("Connection already joined a session")]
    AlreadyJoined,

    /// External collaborator (database, directory) failed.
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Internal error with context.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Returns the signaling `ErrorCode` value for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            RelayError::MalformedFrame(_) => 1, // INVALID_REQUEST
            RelayError::InvalidCredential | RelayError::NotAuthenticated => 2, // UNAUTHORIZED
            RelayError::Unauthorized | RelayError::PermissionDenied(_) => 3, // FORBIDDEN
            RelayError::CodeInvalid(CodeRejection::NotFound) => 4, // NOT_FOUND
            RelayError::CodeInvalid(_) => 3,                       // FORBIDDEN
            RelayError::AlreadyJoined => 5,                        // CONFLICT
            RelayError::Collaborator(_) | RelayError::Internal(_) => 6, // INTERNAL_ERROR
        }
    }

    /// Stable reason string sent in the `error` frame.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            RelayError::InvalidCredential => "invalid_credential",
            RelayError::Unauthorized => "unauthorized",
            RelayError::CodeInvalid(rejection) => rejection.reason(),
            RelayError::NotAuthenticated => "not_authenticated",
            RelayError::PermissionDenied(_) => "permission_denied",
            RelayError::MalformedFrame(_) => "malformed_frame",
            RelayError::AlreadyJoined => "already_joined",
            RelayError::Collaborator(_) | RelayError::Internal(_) => "internal",
        }
    }

    /// Returns a bounded label for the `relay_errors_total` metric.
    ///
    /// Code rejections collapse to one label; the specific reason is logged.
    #[must_use]
    pub fn error_type_label(&self) -> &'static str {
        match self {
            RelayError::InvalidCredential => "invalid_credential",
            RelayError::Unauthorized => "unauthorized",
            RelayError::CodeInvalid(_) => "code_invalid",
            RelayError::NotAuthenticated => "not_authenticated",
            RelayError::PermissionDenied(_) => "permission_denied",
            RelayError::MalformedFrame(_) => "malformed_frame",
            RelayError::AlreadyJoined => "already_joined",
            RelayError::Collaborator(_) => "collaborator",
            RelayError::Internal(_) => "internal",
        }
    }

    /// Returns a client-safe message.
    ///
    /// Hides internal details from clients.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RelayError::InvalidCredential => "Invalid token".to_string(),
            RelayError::Unauthorized => "Unauthorized".to_string(),
            RelayError::CodeInvalid(rejection) => rejection.to_string(),
            RelayError::NotAuthenticated => {
                "Not authenticated - send joinAsHost or joinAsGuest first".to_string()
            }
            RelayError::PermissionDenied(msg) => msg.clone(),
            RelayError::MalformedFrame(_) => "Invalid message format".to_string(),
            RelayError::AlreadyJoined => "Connection has already joined a session".to_string(),
            RelayError::Collaborator(_) | RelayError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}

impl From<CodeRejection> for RelayError {
    fn from(rejection: CodeRejection) -> Self {
        RelayError::CodeInvalid(rejection)
    }
}
