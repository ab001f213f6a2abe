//! Share codes repository.
//!
//! # Security
//!
//! - All queries use parameterized statements
//! - Usage counting is keyed by admission id, so retries never double count

use crate::collaborators::CodeRecord;
use crate::errors::RelayError;
use crate::observability::metrics;
use crate::protocol::Permission;

use sqlx::{PgPool, Row};
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

/// Share codes repository for database operations.
pub struct ShareCodesRepository;

impl ShareCodesRepository {
    /// Fetch a code together with whether its session has ended.
    ///
    /// `code` must already be normalized.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Collaborator` on database failure or an
    /// unrecognized stored permission.
    #[instrument(skip_all, name = "relay.repo.find_code")]
    pub async fn find_with_session(
        pool: &PgPool,
        code: &str,
    ) -> Result<Option<CodeRecord>, RelayError> {
        let start = Instant::now();

        let row = sqlx::query(
            r#"
            SELECT c.code, c.session_id, c.permission, c.max_uses, c.current_uses,
                   c.expires_at, c.revoked, (s.ended_at IS NOT NULL) AS session_ended
            FROM share_codes c
            JOIN share_sessions s ON s.id = c.session_id
            WHERE c.code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("find_code", "error", start.elapsed());
            RelayError::Collaborator(e.to_string())
        })?;

        metrics::record_db_query("find_code", "success", start.elapsed());

        row.map(|row| map_row_to_code(&row)).transpose()
    }

    /// Count one use of `code` for `admission_id`.
    ///
    /// The usage row and the counter increment happen in one statement. A
    /// repeated `admission_id` inserts nothing and increments nothing.
    ///
    /// Returns `true` if this call counted the use.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Collaborator` on database failure.
    #[instrument(skip_all, name = "relay.repo.record_usage")]
    pub async fn record_usage(
        pool: &PgPool,
        code: &str,
        admission_id: Uuid,
    ) -> Result<bool, RelayError> {
        let start = Instant::now();

        let result = sqlx::query(
            r#"
            WITH inserted AS (
                INSERT INTO share_code_usages (admission_id, code, used_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (admission_id) DO NOTHING
                RETURNING code
            )
            UPDATE share_codes
            SET current_uses = current_uses + 1
            WHERE code IN (SELECT code FROM inserted)
            "#,
        )
        .bind(admission_id) // $1
        .bind(code) // $2
        .execute(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("record_usage", "error", start.elapsed());
            RelayError::Collaborator(e.to_string())
        })?;

        metrics::record_db_query("record_usage", "success", start.elapsed());

        Ok(result.rows_affected() > 0)
    }
}

fn map_row_to_code(row: &sqlx::postgres::PgRow) -> Result<CodeRecord, RelayError> {
    let stored_permission: String = row.get("permission");
    let permission = Permission::parse(&stored_permission).ok_or_else(|| {
        RelayError::Collaborator(format!("unrecognized permission: {stored_permission}"))
    })?;
    let session_id: Uuid = row.get("session_id");

    Ok(CodeRecord {
        code: row.get("code"),
        session_key: session_id.to_string(),
        permission,
        max_uses: row.get("max_uses"),
        current_uses: row.get("current_uses"),
        expires_at: row.get("expires_at"),
        revoked: row.get("revoked"),
        session_ended: row.get("session_ended"),
    })
}
