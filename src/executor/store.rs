use chrono::{Duration, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    scanner::RETRY_LEASE_SECONDS,
    store::{StoreError, format_utc, now_utc},
};

/// A job row claimed for execution: status already flipped to PROCESSING.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: Uuid,
    pub event_id: Uuid,
    pub kind: String,
    pub attempts: i64,
    pub max_attempts: i64,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub struct AttemptTiming {
    pub started_at: String,
    pub finished_at: String,
}

/// Phase A: claim the row with a single guarded UPDATE. A terminal row, a
/// row a peer already holds, or a retry that is not yet due matches nothing,
/// and the caller acks without work.
///
/// A FAILED row the scanner just leased carries a `next_run_at` up to one
/// lease window in the future; the claim accepts that horizon so a
/// scanner-enqueued retry is runnable, while refusing retries whose backoff
/// genuinely has not elapsed.
pub async fn claim_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<ClaimedJob>, StoreError> {
    let now = Utc::now();
    let now_str = format_utc(now);
    let claim_horizon = format_utc(now + Duration::seconds(RETRY_LEASE_SECONDS));

    let row: Option<ClaimRow> = sqlx::query_as(
        r#"
        UPDATE jobs
        SET status = 'PROCESSING', next_run_at = NULL, updated_at = ?
        WHERE id = ?
          AND status IN ('QUEUED', 'FAILED')
          AND (next_run_at IS NULL OR next_run_at <= ?)
        RETURNING id, event_id, kind, attempts, max_attempts, payload
        "#,
    )
    .bind(&now_str)
    .bind(job_id.to_string())
    .bind(&claim_horizon)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let payload: Value = serde_json::from_str(&row.payload)
        .map_err(|err| StoreError::Parse(format!("invalid job payload JSON: {err}")))?;

    Ok(Some(ClaimedJob {
        id: Uuid::parse_str(&row.id)
            .map_err(|err| StoreError::Parse(format!("invalid job id: {err}")))?,
        event_id: Uuid::parse_str(&row.event_id)
            .map_err(|err| StoreError::Parse(format!("invalid event id: {err}")))?,
        kind: row.kind,
        attempts: row.attempts,
        max_attempts: row.max_attempts,
        payload,
    }))
}

/// Phase C, success path: append the audit row, close the job, and advance
/// the owning event, all in one short transaction.
pub async fn record_success(
    pool: &SqlitePool,
    job: &ClaimedJob,
    result: &Value,
    timing: &AttemptTiming,
) -> Result<(), StoreError> {
    let now = now_utc();
    let attempt_no = job.attempts + 1;
    let result_json = serde_json::to_string(result)
        .map_err(|err| StoreError::Parse(format!("invalid attempt result: {err}")))?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO job_attempts (id, job_id, attempt_no, status, error, result, started_at, finished_at)
        VALUES (?, ?, ?, 'SUCCEEDED', NULL, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(job.id.to_string())
    .bind(attempt_no)
    .bind(&result_json)
    .bind(&timing.started_at)
    .bind(&timing.finished_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'SUCCEEDED', attempts = ?, last_error = NULL, next_run_at = NULL, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(attempt_no)
    .bind(&now)
    .bind(job.id.to_string())
    .execute(&mut *tx)
    .await?;

    finalize_event(&mut *tx, &job.event_id.to_string()).await?;

    tx.commit().await?;
    Ok(())
}

/// Phase C, failure path. Returns whether the job went DEAD.
pub async fn record_failure(
    pool: &SqlitePool,
    job: &ClaimedJob,
    error: &str,
    result: Option<&Value>,
    timing: &AttemptTiming,
    backoff_seconds: i64,
) -> Result<bool, StoreError> {
    let now = Utc::now();
    let now_str = format_utc(now);
    let attempt_no = job.attempts + 1;
    let is_dead = attempt_no >= job.max_attempts;
    let next_run_at = if is_dead {
        None
    } else {
        Some(format_utc(now + Duration::seconds(backoff_seconds)))
    };
    let result_json = match result {
        Some(value) => Some(
            serde_json::to_string(value)
                .map_err(|err| StoreError::Parse(format!("invalid attempt result: {err}")))?,
        ),
        None => None,
    };

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO job_attempts (id, job_id, attempt_no, status, error, result, started_at, finished_at)
        VALUES (?, ?, ?, 'FAILED', ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(job.id.to_string())
    .bind(attempt_no)
    .bind(error)
    .bind(result_json.as_deref())
    .bind(&timing.started_at)
    .bind(&timing.finished_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        UPDATE jobs
        SET status = ?, attempts = ?, last_error = ?, next_run_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(if is_dead { "DEAD" } else { "FAILED" })
    .bind(attempt_no)
    .bind(error)
    .bind(next_run_at.as_deref())
    .bind(&now_str)
    .bind(job.id.to_string())
    .execute(&mut *tx)
    .await?;

    finalize_event(&mut *tx, &job.event_id.to_string()).await?;

    tx.commit().await?;
    Ok(is_dead)
}

/// Derives the event's status from its children in a single self-consistent
/// UPDATE: any DEAD child fails the event, any live child leaves it alone,
/// otherwise (including zero children) it is DONE. Idempotent by
/// construction, so concurrent finalizations agree.
pub async fn finalize_event<'e, E>(db: E, event_id: &str) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE events
        SET status = CASE
            WHEN EXISTS (
                SELECT 1 FROM jobs j WHERE j.event_id = events.id AND j.status = 'DEAD'
            ) THEN 'FAILED'
            WHEN EXISTS (
                SELECT 1 FROM jobs j
                WHERE j.event_id = events.id
                  AND j.status IN ('QUEUED', 'PROCESSING', 'FAILED')
            ) THEN events.status
            ELSE 'DONE'
        END
        WHERE id = ?
        "#,
    )
    .bind(event_id)
    .execute(db)
    .await?;
    Ok(())
}

#[derive(sqlx::FromRow)]
struct ClaimRow {
    id: String,
    event_id: String,
    kind: String,
    attempts: i64,
    max_attempts: i64,
    payload: String,
}
