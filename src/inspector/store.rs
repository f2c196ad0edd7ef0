use serde_json::Value;
use sqlx::{QueryBuilder, SqlitePool};
use uuid::Uuid;

use crate::{
    store::StoreError,
    types::{
        AttemptStatus, Event, EventStatus, EventSummary, GetEventResponse, Job, JobAttempt,
        JobStatus, ListAttemptsResponse, Subject,
    },
};

#[derive(Debug, Clone)]
pub struct InspectorCursor {
    pub received_at: String,
    pub id: Uuid,
}

#[derive(Debug, Clone)]
pub struct ListEventsParams {
    pub limit: i64,
    pub before: Option<InspectorCursor>,
    pub status: Option<EventStatus>,
    pub source: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ListEventsResult {
    pub events: Vec<EventSummary>,
    pub next_before: Option<InspectorCursor>,
}

pub async fn list_events(
    pool: &SqlitePool,
    params: &ListEventsParams,
) -> Result<ListEventsResult, StoreError> {
    let mut query = QueryBuilder::new(
        "SELECT \
            id, \
            source, \
            type AS event_type, \
            subject_kind, \
            subject_id, \
            status, \
            occurred_at, \
            received_at \
        FROM events \
        WHERE 1 = 1",
    );

    if let Some(status) = params.status {
        query.push(" AND status = ");
        query.push_bind(status.as_str());
    }

    if let Some(source) = params.source.as_deref() {
        query.push(" AND source = ");
        query.push_bind(source);
    }

    if let Some(cursor) = &params.before {
        query.push(" AND (received_at < ");
        query.push_bind(&cursor.received_at);
        query.push(" OR (received_at = ");
        query.push_bind(&cursor.received_at);
        query.push(" AND id < ");
        query.push_bind(cursor.id.to_string());
        query.push("))");
    }

    query.push(" ORDER BY received_at DESC, id DESC LIMIT ");
    query.push_bind(params.limit + 1);

    let rows: Vec<EventSummaryRow> = query.build_query_as().fetch_all(pool).await?;

    let has_more = rows.len() > params.limit as usize;
    let take_count = if has_more {
        params.limit as usize
    } else {
        rows.len()
    };

    let mut events = Vec::with_capacity(take_count);
    let mut last_cursor = None;

    for row in rows.into_iter().take(take_count) {
        let (summary, cursor) = summary_from_row(row)?;
        last_cursor = Some(cursor);
        events.push(summary);
    }

    let next_before = if has_more { last_cursor } else { None };

    Ok(ListEventsResult {
        events,
        next_before,
    })
}

pub async fn get_event(pool: &SqlitePool, event_id: Uuid) -> Result<GetEventResponse, StoreError> {
    let row = sqlx::query_as::<_, EventRow>(
        r#"
        SELECT id, source, type AS event_type, subject_kind, subject_id,
               payload, occurred_at, received_at, idempotency_key, status
        FROM events
        WHERE id = ?
        "#,
    )
    .bind(event_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::NotFound("event not found".to_string()))?;

    let job_rows = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT id, event_id, rule_id, action_id, kind, status, attempts,
               max_attempts, payload, last_error, next_run_at, created_at, updated_at
        FROM jobs
        WHERE event_id = ?
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(event_id.to_string())
    .fetch_all(pool)
    .await?;

    let event = event_from_row(row)?;
    let jobs = job_rows
        .into_iter()
        .map(job_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(GetEventResponse { event, jobs })
}

pub async fn list_job_attempts(
    pool: &SqlitePool,
    job_id: Uuid,
) -> Result<ListAttemptsResponse, StoreError> {
    let exists: Option<String> = sqlx::query_scalar("SELECT id FROM jobs WHERE id = ?")
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;
    if exists.is_none() {
        return Err(StoreError::NotFound("job not found".to_string()));
    }

    let rows = sqlx::query_as::<_, AttemptRow>(
        r#"
        SELECT id, job_id, attempt_no, status, error, result, started_at, finished_at
        FROM job_attempts
        WHERE job_id = ?
        ORDER BY attempt_no ASC
        "#,
    )
    .bind(job_id.to_string())
    .fetch_all(pool)
    .await?;

    let attempts = rows
        .into_iter()
        .map(attempt_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ListAttemptsResponse { attempts })
}

#[derive(sqlx::FromRow)]
struct EventSummaryRow {
    id: String,
    source: String,
    event_type: String,
    subject_kind: String,
    subject_id: String,
    status: String,
    occurred_at: String,
    received_at: String,
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    source: String,
    event_type: String,
    subject_kind: String,
    subject_id: String,
    payload: String,
    occurred_at: String,
    received_at: String,
    idempotency_key: Option<String>,
    status: String,
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    event_id: String,
    rule_id: String,
    action_id: String,
    kind: String,
    status: String,
    attempts: i64,
    max_attempts: i64,
    payload: String,
    last_error: Option<String>,
    next_run_at: Option<String>,
    created_at: String,
    updated_at: String,
}

#[derive(sqlx::FromRow)]
struct AttemptRow {
    id: String,
    job_id: String,
    attempt_no: i64,
    status: String,
    error: Option<String>,
    result: Option<String>,
    started_at: String,
    finished_at: String,
}

fn summary_from_row(row: EventSummaryRow) -> Result<(EventSummary, InspectorCursor), StoreError> {
    let status = parse_event_status(&row.status)?;
    let event_id = parse_uuid("event id", &row.id)?;

    let summary = EventSummary {
        id: event_id,
        source: row.source,
        event_type: row.event_type,
        subject: Subject {
            kind: row.subject_kind,
            id: row.subject_id,
        },
        status,
        occurred_at: row.occurred_at,
        received_at: row.received_at.clone(),
    };

    Ok((
        summary,
        InspectorCursor {
            received_at: row.received_at,
            id: event_id,
        },
    ))
}

fn event_from_row(row: EventRow) -> Result<Event, StoreError> {
    let payload: Value = serde_json::from_str(&row.payload)
        .map_err(|err| StoreError::Parse(format!("invalid payload JSON: {err}")))?;

    Ok(Event {
        id: parse_uuid("event id", &row.id)?,
        source: row.source,
        event_type: row.event_type,
        subject: Subject {
            kind: row.subject_kind,
            id: row.subject_id,
        },
        payload,
        occurred_at: row.occurred_at,
        received_at: row.received_at,
        idempotency_key: row.idempotency_key,
        status: parse_event_status(&row.status)?,
    })
}

fn job_from_row(row: JobRow) -> Result<Job, StoreError> {
    let payload: Value = serde_json::from_str(&row.payload)
        .map_err(|err| StoreError::Parse(format!("invalid job payload JSON: {err}")))?;
    let status = JobStatus::parse(&row.status)
        .ok_or_else(|| StoreError::Parse(format!("unknown job status: {}", row.status)))?;

    Ok(Job {
        id: parse_uuid("job id", &row.id)?,
        event_id: parse_uuid("event id", &row.event_id)?,
        rule_id: parse_uuid("rule id", &row.rule_id)?,
        action_id: parse_uuid("action id", &row.action_id)?,
        kind: row.kind,
        status,
        attempts: row.attempts,
        max_attempts: row.max_attempts,
        payload,
        last_error: row.last_error,
        next_run_at: row.next_run_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn attempt_from_row(row: AttemptRow) -> Result<JobAttempt, StoreError> {
    let status = AttemptStatus::parse(&row.status)
        .ok_or_else(|| StoreError::Parse(format!("unknown attempt status: {}", row.status)))?;
    let result = match row.result {
        Some(raw) => Some(
            serde_json::from_str(&raw)
                .map_err(|err| StoreError::Parse(format!("invalid attempt result JSON: {err}")))?,
        ),
        None => None,
    };

    Ok(JobAttempt {
        id: parse_uuid("attempt id", &row.id)?,
        job_id: parse_uuid("job id", &row.job_id)?,
        attempt_no: row.attempt_no,
        status,
        error: row.error,
        result,
        started_at: row.started_at,
        finished_at: row.finished_at,
    })
}

fn parse_event_status(status: &str) -> Result<EventStatus, StoreError> {
    EventStatus::parse(status)
        .ok_or_else(|| StoreError::Parse(format!("unknown event status: {status}")))
}

fn parse_uuid(field: &str, value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|err| StoreError::Parse(format!("invalid {field}: {err}")))
}
