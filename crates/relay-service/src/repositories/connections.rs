//! Connections repository (guest admission audit).

use crate::errors::RelayError;
use crate::observability::metrics;

use sqlx::PgPool;
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

/// Connections repository for database operations.
pub struct ConnectionsRepository;

impl ConnectionsRepository {
    /// Insert an audit row for an admitted guest.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Collaborator` on database failure.
    #[instrument(skip_all, name = "relay.repo.insert_connection")]
    pub async fn insert(
        pool: &PgPool,
        session_id: Uuid,
        user_id: Uuid,
        code_used: &str,
    ) -> Result<(), RelayError> {
        let start = Instant::now();

        sqlx::query(
            r#"
            INSERT INTO connections (id, session_id, user_id, code_used, connected_at)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(Uuid::new_v4()) // $1
        .bind(session_id) // $2
        .bind(user_id) // $3
        .bind(code_used) // $4
        .execute(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("insert_connection", "error", start.elapsed());
            RelayError::Collaborator(e.to_string())
        })?;

        metrics::record_db_query("insert_connection", "success", start.elapsed());

        Ok(())
    }
}
