use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::store::{StoreError, format_utc};

/// Selects up to `batch` due FAILED jobs, oldest first, and pushes their
/// `next_run_at` forward by the lease window in the same statement. The
/// returned ids are safe to publish: a second sweep inside the lease window
/// no longer sees them as due.
pub async fn lease_due_jobs(
    pool: &SqlitePool,
    batch: i64,
    lease_seconds: i64,
) -> Result<Vec<Uuid>, StoreError> {
    let now = Utc::now();
    let now_str = format_utc(now);
    let lease_until = format_utc(now + Duration::seconds(lease_seconds));

    let ids: Vec<String> = sqlx::query_scalar(
        r#"
        WITH due AS (
            SELECT id
            FROM jobs
            WHERE status = 'FAILED'
              AND next_run_at IS NOT NULL
              AND next_run_at <= ?
            ORDER BY next_run_at ASC
            LIMIT ?
        )
        UPDATE jobs
        SET next_run_at = ?, updated_at = ?
        WHERE id IN (SELECT id FROM due) AND status = 'FAILED'
        RETURNING id
        "#,
    )
    .bind(&now_str)
    .bind(batch)
    .bind(&lease_until)
    .bind(&now_str)
    .fetch_all(pool)
    .await?;

    ids.into_iter()
        .map(|id| {
            Uuid::parse_str(&id).map_err(|err| StoreError::Parse(format!("invalid job id: {err}")))
        })
        .collect()
}
