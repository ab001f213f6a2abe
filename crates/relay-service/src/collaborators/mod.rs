//! External collaborators consumed by the relay core.
//!
//! The lifecycle controller only sees these traits. Production wiring uses
//! [`jwt::JwtIdentityVerifier`] and [`postgres::PgStore`]; tests use the
//! in-memory doubles in `relay-test-utils`.
//!
//! Code evaluation is a pure function so every resolver applies the same
//! rejection order: not found, revoked, session ended, expired, uses exhausted.

pub mod jwt;
pub mod postgres;

pub use jwt::JwtIdentityVerifier;
pub use postgres::PgStore;

use crate::errors::{CodeRejection, RelayError};
use crate::protocol::Permission;

use chrono::{DateTime, Utc};
use common::types::ConnectionId;

/// Verifies bearer credentials.
#[async_trait::async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Returns the subject identifier for a valid credential.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::InvalidCredential` for any invalid credential.
    async fn verify_credential(&self, token: &str) -> Result<String, RelayError>;
}

/// Resolves one-time access codes to session grants.
#[async_trait::async_trait]
pub trait AccessGrantResolver: Send + Sync {
    /// Resolve a normalized access code.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::CodeInvalid` with the first failing check, or
    /// `RelayError::Collaborator` if the backing store is unavailable.
    async fn resolve_access_code(&self, code: &str) -> Result<AccessGrant, RelayError>;

    /// Count one use of `code`.
    ///
    /// Must be idempotent per `admission_id`: a retried call for the same
    /// admission never counts twice.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Collaborator` if the write failed.
    async fn record_usage(&self, code: &str, admission_id: ConnectionId)
        -> Result<(), RelayError>;
}

/// Session ownership and metadata.
#[async_trait::async_trait]
pub trait SessionDirectory: Send + Sync {
    /// Whether `identity` hosts `session_key`.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Collaborator` if the lookup failed.
    async fn session_owned_by(&self, session_key: &str, identity: &str)
        -> Result<bool, RelayError>;

    /// Session metadata, or `None` if no such session exists.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Collaborator` if the lookup failed.
    async fn session_details(&self, session_key: &str)
        -> Result<Option<SessionDetails>, RelayError>;
}

/// Records guest admissions.
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    /// Record an admitted guest connection.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Collaborator` if the write failed. Callers log
    /// and discard the error.
    async fn record_connection_audit(&self, audit: ConnectionAudit) -> Result<(), RelayError>;
}

/// A resolved access code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    /// Normalized code.
    pub code: String,
    /// Session the code admits to.
    pub session_key: String,
    /// Permission granted to the guest.
    pub permission: Permission,
}

/// Session metadata returned by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDetails {
    /// Identity of the session owner.
    pub host_identity: String,
    /// Host public key for guest-side key agreement.
    pub host_public_key: Option<String>,
    /// Host display name.
    pub host_username: Option<String>,
    /// Display name, if the host set one.
    pub session_name: Option<String>,
    /// Whether the session has ended.
    pub ended: bool,
}

/// Audit record for an admitted guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionAudit {
    /// Session joined.
    pub session_key: String,
    /// Guest identity.
    pub identity: String,
    /// Code used.
    pub code: String,
}

/// Stored state of an access code, joined with its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRecord {
    /// Normalized code.
    pub code: String,
    /// Session the code belongs to.
    pub session_key: String,
    /// Permission granted on use.
    pub permission: Permission,
    /// Use limit, if any.
    pub max_uses: Option<i32>,
    /// Uses so far.
    pub current_uses: i32,
    /// Expiry time, if any.
    pub expires_at: Option<DateTime<Utc>>,
    /// Revoked by the host.
    pub revoked: bool,
    /// The code's session has ended.
    pub session_ended: bool,
}

/// Trim and upper-case an access code as typed by a user.
#[must_use]
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Decide whether a stored code admits a guest at `now`.
///
/// # Errors
///
/// Returns the first failing check, in order: not found, revoked, session
/// ended, expired, uses exhausted.
pub fn evaluate_code(
    record: Option<&CodeRecord>,
    now: DateTime<Utc>,
) -> Result<AccessGrant, CodeRejection> {
    let record = record.ok_or(CodeRejection::NotFound)?;

    if record.revoked {
        return Err(CodeRejection::Revoked);
    }
    if record.session_ended {
        return Err(CodeRejection::SessionEnded);
    }
    if record.expires_at.is_some_and(|expires_at| expires_at < now) {
        return Err(CodeRejection::Expired);
    }
    if record
        .max_uses
        .is_some_and(|max_uses| record.current_uses >= max_uses)
    {
        return Err(CodeRejection::UsesExhausted);
    }

    Ok(AccessGrant {
        code: record.code.clone(),
        session_key: record.session_key.clone(),
        permission: record.permission,
    })
}
