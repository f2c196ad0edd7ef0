use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    broker::EventIngested,
    store::{StoreError, now_utc},
    types::Subject,
};

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub source: String,
    pub event_type: String,
    pub subject: Subject,
    pub payload: Value,
    /// Normalized RFC3339 UTC; defaults to the receipt time when absent.
    pub occurred_at: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub event_id: Uuid,
    pub deduplicated: bool,
    /// The broker message for a freshly inserted event; `None` on dedupe,
    /// where nothing must be republished.
    pub message: Option<EventIngested>,
}

/// Inserts an event row in ACCEPTED state. A matching idempotency key wins
/// over insertion; a lost unique race surfaces as `StoreError::Conflict`.
pub async fn insert_event(pool: &SqlitePool, new: &NewEvent) -> Result<IngestOutcome, StoreError> {
    if let Some(key) = new.idempotency_key.as_deref() {
        let existing: Option<String> =
            sqlx::query_scalar("SELECT id FROM events WHERE idempotency_key = ?")
                .bind(key)
                .fetch_optional(pool)
                .await?;
        if let Some(id) = existing {
            let event_id = Uuid::parse_str(&id)
                .map_err(|err| StoreError::Parse(format!("invalid event id: {err}")))?;
            return Ok(IngestOutcome {
                event_id,
                deduplicated: true,
                message: None,
            });
        }
    }

    let event_id = Uuid::new_v4();
    let received_at = now_utc();
    let occurred_at = new
        .occurred_at
        .clone()
        .unwrap_or_else(|| received_at.clone());
    let payload_json = serde_json::to_string(&new.payload)
        .map_err(|err| StoreError::Parse(format!("invalid payload JSON: {err}")))?;

    sqlx::query(
        r#"
        INSERT INTO events (
            id, source, type, subject_kind, subject_id, payload,
            occurred_at, received_at, idempotency_key, status
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'ACCEPTED')
        "#,
    )
    .bind(event_id.to_string())
    .bind(&new.source)
    .bind(&new.event_type)
    .bind(&new.subject.kind)
    .bind(&new.subject.id)
    .bind(&payload_json)
    .bind(&occurred_at)
    .bind(&received_at)
    .bind(new.idempotency_key.as_deref())
    .execute(pool)
    .await?;

    Ok(IngestOutcome {
        event_id,
        deduplicated: false,
        message: Some(EventIngested {
            event_id,
            source: new.source.clone(),
            event_type: new.event_type.clone(),
            subject: new.subject.clone(),
            payload: new.payload.clone(),
            occurred_at,
            received_at,
        }),
    })
}

/// Rebuilds the `event.ingested` message for an existing row, for operator
/// replay after a lost post-commit publish.
pub async fn load_event_message(
    pool: &SqlitePool,
    event_id: Uuid,
) -> Result<EventIngested, StoreError> {
    let row = sqlx::query_as::<_, EventMessageRow>(
        r#"
        SELECT id, source, type AS event_type, subject_kind, subject_id,
               payload, occurred_at, received_at
        FROM events
        WHERE id = ?
        "#,
    )
    .bind(event_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::NotFound("event not found".to_string()))?;

    let payload: Value = serde_json::from_str(&row.payload)
        .map_err(|err| StoreError::Parse(format!("invalid payload JSON: {err}")))?;

    Ok(EventIngested {
        event_id,
        source: row.source,
        event_type: row.event_type,
        subject: Subject {
            kind: row.subject_kind,
            id: row.subject_id,
        },
        payload,
        occurred_at: row.occurred_at,
        received_at: row.received_at,
    })
}

#[derive(sqlx::FromRow)]
#[allow(dead_code)]
struct EventMessageRow {
    id: String,
    source: String,
    event_type: String,
    subject_kind: String,
    subject_id: String,
    payload: String,
    occurred_at: String,
    received_at: String,
}
