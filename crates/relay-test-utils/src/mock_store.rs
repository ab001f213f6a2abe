//! In-memory access code, session and audit store.
//!
//! Implements [`AccessGrantResolver`], [`SessionDirectory`] and [`AuditSink`]
//! with the same code evaluation as the PostgreSQL store, plus knobs for the
//! failure modes relay tests care about:
//! - failing usage increments (to exercise retries)
//! - a failing audit sink
//! - a session that ends right after its code resolves
//!
//! # Example
//!
//! ```rust,ignore
//! let session = TestSession::random("host-1");
//! let store = MockStore::new()
//!     .with_session(&session)
//!     .with_code(TestCode::new("ABC123", &session.key).control().build());
//! ```

use chrono::Utc;
use common::types::ConnectionId;
use relay_service::collaborators::{
    evaluate_code, AccessGrant, AccessGrantResolver, AuditSink, CodeRecord, ConnectionAudit,
    SessionDetails, SessionDirectory,
};
use relay_service::errors::RelayError;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::fixtures::TestSession;

/// Mock store for relay collaborator tests.
#[derive(Debug, Clone, Default)]
pub struct MockStore {
    inner: Arc<Mutex<MockStoreInner>>,
}

#[derive(Debug, Default)]
struct MockStoreInner {
    sessions: HashMap<String, SessionDetails>,
    codes: HashMap<String, CodeRecord>,
    /// Admissions already counted, for idempotent usage increments.
    counted_admissions: HashSet<ConnectionId>,
    usage_attempts: usize,
    usage_failures_remaining: usize,
    audit_log: Vec<ConnectionAudit>,
    audit_attempts: usize,
    fail_audit: bool,
    end_after_resolve: HashSet<String>,
    unavailable: bool,
}

impl MockStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session.
    #[must_use]
    pub fn with_session(self, session: &TestSession) -> Self {
        self.insert_session(session);
        self
    }

    /// Add an access code.
    #[must_use]
    pub fn with_code(self, code: CodeRecord) -> Self {
        self.insert_code(code);
        self
    }

    /// Fail the first `attempts` usage increments.
    #[must_use]
    pub fn failing_usage(self, attempts: usize) -> Self {
        self.inner.lock().unwrap().usage_failures_remaining = attempts;
        self
    }

    /// Fail every audit write.
    #[must_use]
    pub fn failing_audit(self) -> Self {
        self.inner.lock().unwrap().fail_audit = true;
        self
    }

    /// End `session_key` as soon as one of its codes resolves.
    #[must_use]
    pub fn ending_session_after_resolve(self, session_key: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .end_after_resolve
            .insert(session_key.to_string());
        self
    }

    /// Make every call fail as if the database were down.
    #[must_use]
    pub fn unavailable(self) -> Self {
        self.inner.lock().unwrap().unavailable = true;
        self
    }

    pub fn insert_session(&self, session: &TestSession) {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .insert(session.key.clone(), session.details());
    }

    pub fn insert_code(&self, code: CodeRecord) {
        self.inner
            .lock()
            .unwrap()
            .codes
            .insert(code.code.clone(), code);
    }

    /// Mark a session as ended.
    pub fn end_session(&self, session_key: &str) {
        if let Some(session) = self.inner.lock().unwrap().sessions.get_mut(session_key) {
            session.ended = true;
        }
    }

    /// Revoke a code.
    pub fn revoke_code(&self, code: &str) {
        if let Some(record) = self.inner.lock().unwrap().codes.get_mut(code) {
            record.revoked = true;
        }
    }

    /// Uses counted for `code`.
    pub fn current_uses(&self, code: &str) -> Option<i32> {
        self.inner
            .lock()
            .unwrap()
            .codes
            .get(code)
            .map(|r| r.current_uses)
    }

    /// Number of `record_usage` calls, including failed ones.
    pub fn usage_attempts(&self) -> usize {
        self.inner.lock().unwrap().usage_attempts
    }

    /// Successfully written audit records.
    pub fn audit_log(&self) -> Vec<ConnectionAudit> {
        self.inner.lock().unwrap().audit_log.clone()
    }

    /// Number of audit writes attempted, including failed ones.
    pub fn audit_attempts(&self) -> usize {
        self.inner.lock().unwrap().audit_attempts
    }

    fn check_available(inner: &MockStoreInner) -> Result<(), RelayError> {
        if inner.unavailable {
            return Err(RelayError::Collaborator("mock store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl AccessGrantResolver for MockStore {
    async fn resolve_access_code(&self, code: &str) -> Result<AccessGrant, RelayError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_available(&inner)?;

        let record = inner.codes.get(code).cloned().map(|mut record| {
            record.session_ended |= inner
                .sessions
                .get(&record.session_key)
                .map_or(true, |s| s.ended);
            record
        });
        let grant = evaluate_code(record.as_ref(), Utc::now())?;

        if inner.end_after_resolve.remove(&grant.session_key) {
            if let Some(session) = inner.sessions.get_mut(&grant.session_key) {
                session.ended = true;
            }
        }
        Ok(grant)
    }

    async fn record_usage(
        &self,
        code: &str,
        admission_id: ConnectionId,
    ) -> Result<(), RelayError> {
        let mut inner = self.inner.lock().unwrap();
        inner.usage_attempts += 1;
        Self::check_available(&inner)?;

        if inner.usage_failures_remaining > 0 {
            inner.usage_failures_remaining -= 1;
            return Err(RelayError::Collaborator("mock usage write failed".to_string()));
        }

        if inner.counted_admissions.insert(admission_id) {
            if let Some(record) = inner.codes.get_mut(code) {
                record.current_uses += 1;
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SessionDirectory for MockStore {
    async fn session_owned_by(
        &self,
        session_key: &str,
        identity: &str,
    ) -> Result<bool, RelayError> {
        let inner = self.inner.lock().unwrap();
        Self::check_available(&inner)?;
        Ok(inner
            .sessions
            .get(session_key)
            .is_some_and(|s| s.host_identity == identity))
    }

    async fn session_details(
        &self,
        session_key: &str,
    ) -> Result<Option<SessionDetails>, RelayError> {
        let inner = self.inner.lock().unwrap();
        Self::check_available(&inner)?;
        Ok(inner.sessions.get(session_key).cloned())
    }
}

#[async_trait::async_trait]
impl AuditSink for MockStore {
    async fn record_connection_audit(&self, audit: ConnectionAudit) -> Result<(), RelayError> {
        let mut inner = self.inner.lock().unwrap();
        inner.audit_attempts += 1;
        if inner.fail_audit || inner.unavailable {
            return Err(RelayError::Collaborator("mock audit write failed".to_string()));
        }
        inner.audit_log.push(audit);
        Ok(())
    }
}
