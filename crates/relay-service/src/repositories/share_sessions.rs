//! Share sessions repository.

use crate::errors::RelayError;
use crate::observability::metrics;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

/// A share session joined with its host's username.
#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: Uuid,
    pub host_user_id: Uuid,
    pub host_public_key: Option<String>,
    pub host_username: Option<String>,
    pub session_name: Option<String>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Share sessions repository for database operations.
pub struct ShareSessionsRepository;

impl ShareSessionsRepository {
    /// Fetch a session by id.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Collaborator` on database failure.
    #[instrument(skip_all, name = "relay.repo.find_session")]
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<SessionRow>, RelayError> {
        let start = Instant::now();

        let row = sqlx::query(
            r#"
            SELECT s.id, s.host_user_id, s.host_public_key, s.session_name, s.ended_at,
                   u.username AS host_username
            FROM share_sessions s
            LEFT JOIN users u ON u.id = s.host_user_id
            WHERE s.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("find_session", "error", start.elapsed());
            RelayError::Collaborator(e.to_string())
        })?;

        metrics::record_db_query("find_session", "success", start.elapsed());

        Ok(row.map(|row| SessionRow {
            id: row.get("id"),
            host_user_id: row.get("host_user_id"),
            host_public_key: row.get("host_public_key"),
            host_username: row.get("host_username"),
            session_name: row.get("session_name"),
            ended_at: row.get("ended_at"),
        }))
    }

    /// Whether `host_user_id` owns the session `id`.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Collaborator` on database failure.
    #[instrument(skip_all, name = "relay.repo.session_owned_by")]
    pub async fn is_owned_by(
        pool: &PgPool,
        id: Uuid,
        host_user_id: Uuid,
    ) -> Result<bool, RelayError> {
        let start = Instant::now();

        let owned: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM share_sessions WHERE id = $1 AND host_user_id = $2
            )
            "#,
        )
        .bind(id) // $1
        .bind(host_user_id) // $2
        .fetch_one(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("session_owned_by", "error", start.elapsed());
            RelayError::Collaborator(e.to_string())
        })?;

        metrics::record_db_query("session_owned_by", "success", start.elapsed());

        Ok(owned)
    }
}
