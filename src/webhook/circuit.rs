//! DB-backed per-destination circuit breaker. State lives in
//! `webhook_circuit` so it survives restarts and is shared by every worker.

use sqlx::SqlitePool;

use crate::{
    store::{StoreError, now_utc},
    types::{CircuitBreakerEntry, CircuitState},
};

/// Ensures a row exists for `key` (defaulting to CLOSED) and returns its
/// current state.
pub async fn before_call(pool: &SqlitePool, key: &str) -> Result<CircuitState, sqlx::Error> {
    let now = now_utc();

    sqlx::query(
        r#"
        INSERT INTO webhook_circuit (key, state, failure_count, updated_at)
        VALUES (?, 'CLOSED', 0, ?)
        ON CONFLICT (key) DO NOTHING
        "#,
    )
    .bind(key)
    .bind(&now)
    .execute(pool)
    .await?;

    let state: String = sqlx::query_scalar("SELECT state FROM webhook_circuit WHERE key = ?")
        .bind(key)
        .fetch_one(pool)
        .await?;

    Ok(CircuitState::parse(&state).unwrap_or(CircuitState::Closed))
}

/// A successful call fully re-closes the breaker.
pub async fn on_success(pool: &SqlitePool, key: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE webhook_circuit
        SET state = 'CLOSED',
            failure_count = 0,
            opened_at = NULL,
            last_failure_at = NULL,
            updated_at = ?
        WHERE key = ?
        "#,
    )
    .bind(now_utc())
    .bind(key)
    .execute(pool)
    .await?;
    Ok(())
}

/// A final call failure bumps the counter; reaching the threshold trips the
/// breaker OPEN.
pub async fn on_failure(
    pool: &SqlitePool,
    key: &str,
    failure_threshold: i64,
) -> Result<(), sqlx::Error> {
    let now = now_utc();

    let current: Option<i64> =
        sqlx::query_scalar("SELECT failure_count FROM webhook_circuit WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    let failure_count = current.unwrap_or(0) + 1;
    let opened = failure_count >= failure_threshold;

    sqlx::query(
        r#"
        INSERT INTO webhook_circuit (key, state, failure_count, opened_at, last_failure_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (key) DO UPDATE SET
            state = excluded.state,
            failure_count = excluded.failure_count,
            opened_at = excluded.opened_at,
            last_failure_at = excluded.last_failure_at,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(if opened { "OPEN" } else { "CLOSED" })
    .bind(failure_count)
    .bind(if opened { Some(now.as_str()) } else { None })
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn list(
    pool: &SqlitePool,
    state: Option<CircuitState>,
) -> Result<Vec<CircuitBreakerEntry>, StoreError> {
    let rows: Vec<CircuitRow> = match state {
        Some(state) => {
            sqlx::query_as(
                r#"
                SELECT key, state, failure_count, opened_at, last_failure_at, updated_at
                FROM webhook_circuit
                WHERE state = ?
                ORDER BY updated_at DESC
                LIMIT 200
                "#,
            )
            .bind(state.as_str())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as(
                r#"
                SELECT key, state, failure_count, opened_at, last_failure_at, updated_at
                FROM webhook_circuit
                ORDER BY updated_at DESC
                LIMIT 200
                "#,
            )
            .fetch_all(pool)
            .await?
        }
    };

    rows.into_iter().map(CircuitRow::try_into).collect()
}

/// Operator reset: the only way out of OPEN.
pub async fn reset(pool: &SqlitePool, key: &str) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE webhook_circuit
        SET state = 'CLOSED',
            failure_count = 0,
            opened_at = NULL,
            last_failure_at = NULL,
            updated_at = ?
        WHERE key = ?
        "#,
    )
    .bind(now_utc())
    .bind(key)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("circuit key not found".to_string()));
    }
    Ok(())
}

#[derive(sqlx::FromRow)]
struct CircuitRow {
    key: String,
    state: String,
    failure_count: i64,
    opened_at: Option<String>,
    last_failure_at: Option<String>,
    updated_at: String,
}

impl TryFrom<CircuitRow> for CircuitBreakerEntry {
    type Error = StoreError;

    fn try_from(row: CircuitRow) -> Result<Self, Self::Error> {
        let state = CircuitState::parse(&row.state)
            .ok_or_else(|| StoreError::Parse(format!("unknown circuit state: {}", row.state)))?;
        Ok(CircuitBreakerEntry {
            key: row.key,
            state,
            failure_count: row.failure_count,
            opened_at: row.opened_at,
            last_failure_at: row.last_failure_at,
            updated_at: row.updated_at,
        })
    }
}
