//! PostgreSQL-backed collaborators.
//!
//! `PgStore` implements the access-grant resolver, session directory and
//! audit sink over the business API's schema. Session keys and identities are
//! UUIDs there; a key that does not parse is treated as absent.

use super::{
    evaluate_code, AccessGrant, AccessGrantResolver, AuditSink, ConnectionAudit,
    SessionDetails, SessionDirectory,
};
use crate::errors::RelayError;
use crate::repositories::{
    ConnectionsRepository, SessionRow, ShareCodesRepository, ShareSessionsRepository,
};

use chrono::Utc;
use common::types::ConnectionId;
use sqlx::PgPool;
use uuid::Uuid;

/// Collaborator implementation over a shared connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a store over `pool`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AccessGrantResolver for PgStore {
    async fn resolve_access_code(&self, code: &str) -> Result<AccessGrant, RelayError> {
        let record = ShareCodesRepository::find_with_session(&self.pool, code).await?;
        evaluate_code(record.as_ref(), Utc::now()).map_err(RelayError::from)
    }

    async fn record_usage(
        &self,
        code: &str,
        admission_id: ConnectionId,
    ) -> Result<(), RelayError> {
        let counted = ShareCodesRepository::record_usage(&self.pool, code, admission_id.0).await?;
        if !counted {
            tracing::debug!(
                target: "relay.repo",
                admission_id = %admission_id,
                "Usage already recorded for admission"
            );
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SessionDirectory for PgStore {
    async fn session_owned_by(
        &self,
        session_key: &str,
        identity: &str,
    ) -> Result<bool, RelayError> {
        let (Some(session_id), Some(user_id)) = (parse_key(session_key), parse_key(identity))
        else {
            return Ok(false);
        };
        ShareSessionsRepository::is_owned_by(&self.pool, session_id, user_id).await
    }

    async fn session_details(
        &self,
        session_key: &str,
    ) -> Result<Option<SessionDetails>, RelayError> {
        let Some(session_id) = parse_key(session_key) else {
            return Ok(None);
        };
        let row = ShareSessionsRepository::find_by_id(&self.pool, session_id).await?;
        Ok(row.map(details_from_row))
    }
}

#[async_trait::async_trait]
impl AuditSink for PgStore {
    async fn record_connection_audit(&self, audit: ConnectionAudit) -> Result<(), RelayError> {
        let session_id = parse_key(&audit.session_key)
            .ok_or_else(|| RelayError::Collaborator("session key is not a UUID".to_string()))?;
        let user_id = parse_key(&audit.identity)
            .ok_or_else(|| RelayError::Collaborator("identity is not a UUID".to_string()))?;
        ConnectionsRepository::insert(&self.pool, session_id, user_id, &audit.code).await
    }
}

fn parse_key(value: &str) -> Option<Uuid> {
    Uuid::parse_str(value.trim()).ok()
}

fn details_from_row(row: SessionRow) -> SessionDetails {
    SessionDetails {
        host_identity: row.host_user_id.to_string(),
        host_public_key: row.host_public_key,
        host_username: row.host_username,
        session_name: row.session_name,
        ended: row.ended_at.is_some(),
    }
}
