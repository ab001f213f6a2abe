//! Pre-configured test data for relay tests.
//!
//! Provides builders for:
//! - Sessions (owner, host key, name, ended)
//! - Access codes (permission, limits, expiry, revocation)
//! - Bearer tokens accepted by [`MockIdentityVerifier`](crate::MockIdentityVerifier)

use chrono::{Duration, Utc};
use relay_service::collaborators::{CodeRecord, SessionDetails};
use relay_service::protocol::Permission;
use uuid::Uuid;

/// Prefix of tokens the mock identity verifier accepts.
pub const VALID_TOKEN_PREFIX: &str = "valid:";

/// Bearer token that verifies as `identity`.
#[must_use]
pub fn token_for(identity: &str) -> String {
    format!("{VALID_TOKEN_PREFIX}{identity}")
}

/// Test session fixture.
#[derive(Debug, Clone)]
pub struct TestSession {
    /// Session key.
    pub key: String,
    /// Owner identity.
    pub host_identity: String,
    pub host_public_key: Option<String>,
    pub host_username: Option<String>,
    pub session_name: Option<String>,
    pub ended: bool,
}

impl TestSession {
    /// Create a live session owned by `host_identity`.
    #[must_use]
    pub fn new(key: impl Into<String>, host_identity: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            host_identity: host_identity.into(),
            host_public_key: Some("host-public-key".to_string()),
            host_username: None,
            session_name: None,
            ended: false,
        }
    }

    /// Create a session with a random key.
    #[must_use]
    pub fn random(host_identity: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4().to_string(), host_identity)
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.session_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_host_username(mut self, username: impl Into<String>) -> Self {
        self.host_username = Some(username.into());
        self
    }

    #[must_use]
    pub fn without_host_key(mut self) -> Self {
        self.host_public_key = None;
        self
    }

    /// Mark the session as ended.
    #[must_use]
    pub fn ended(mut self) -> Self {
        self.ended = true;
        self
    }

    /// Directory view of this session.
    #[must_use]
    pub fn details(&self) -> SessionDetails {
        SessionDetails {
            host_identity: self.host_identity.clone(),
            host_public_key: self.host_public_key.clone(),
            host_username: self.host_username.clone(),
            session_name: self.session_name.clone(),
            ended: self.ended,
        }
    }
}

/// Test access code fixture.
#[derive(Debug, Clone)]
pub struct TestCode {
    record: CodeRecord,
}

impl TestCode {
    /// Create an unlimited, read-only code for `session_key`.
    #[must_use]
    pub fn new(code: impl Into<String>, session_key: impl Into<String>) -> Self {
        Self {
            record: CodeRecord {
                code: code.into(),
                session_key: session_key.into(),
                permission: Permission::Read,
                max_uses: None,
                current_uses: 0,
                expires_at: None,
                revoked: false,
                session_ended: false,
            },
        }
    }

    /// Grant control permission.
    #[must_use]
    pub fn control(mut self) -> Self {
        self.record.permission = Permission::Control;
        self
    }

    #[must_use]
    pub fn max_uses(mut self, max_uses: i32) -> Self {
        self.record.max_uses = Some(max_uses);
        self
    }

    #[must_use]
    pub fn used(mut self, current_uses: i32) -> Self {
        self.record.current_uses = current_uses;
        self
    }

    /// Expired one minute ago.
    #[must_use]
    pub fn expired(mut self) -> Self {
        self.record.expires_at = Some(Utc::now() - Duration::minutes(1));
        self
    }

    /// Expires in one hour.
    #[must_use]
    pub fn expiring(mut self) -> Self {
        self.record.expires_at = Some(Utc::now() + Duration::hours(1));
        self
    }

    #[must_use]
    pub fn revoked(mut self) -> Self {
        self.record.revoked = true;
        self
    }

    #[must_use]
    pub fn build(self) -> CodeRecord {
        self.record
    }
}
