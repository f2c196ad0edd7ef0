use axum::{Json, extract::State};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    extractors::{ValidPath, ValidQuery},
    ingest::load_event_message,
    inspector::{InspectorCursor, ListEventsParams, get_event, list_events, list_job_attempts},
    state::AppState,
    types::{
        EventStatus, GetEventResponse, ListAttemptsResponse, ListEventsResponse,
        ReplayEventResponse,
    },
};

#[derive(Debug, Deserialize)]
pub struct ListEventsQuery {
    limit: Option<i64>,
    before: Option<String>,
    status: Option<String>,
    source: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CursorPayload {
    received_at: String,
    id: String,
}

pub async fn list_events_handler(
    State(state): State<AppState>,
    ValidQuery(query): ValidQuery<ListEventsQuery>,
) -> Result<Json<ListEventsResponse>, ApiError> {
    let limit = parse_limit(query.limit)?;
    let before = match query.before {
        Some(raw) => Some(decode_cursor(&raw)?),
        None => None,
    };
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            EventStatus::parse(raw).ok_or_else(|| ApiError::validation("status is invalid"))?,
        ),
        None => None,
    };
    let source = match query.source {
        Some(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Err(ApiError::validation("source must be non-empty"));
            }
            Some(trimmed.to_string())
        }
        None => None,
    };

    let params = ListEventsParams {
        limit,
        before,
        status,
        source,
    };

    let result = list_events(&state.pool, &params).await?;
    let next_before = match result.next_before {
        Some(cursor) => Some(encode_cursor(&cursor)?),
        None => None,
    };

    Ok(Json(ListEventsResponse {
        events: result.events,
        next_before,
    }))
}

pub async fn get_event_handler(
    State(state): State<AppState>,
    ValidPath(event_id): ValidPath<String>,
) -> Result<Json<GetEventResponse>, ApiError> {
    let event_id = parse_uuid("event_id", &event_id)?;
    let result = get_event(&state.pool, event_id).await?;
    Ok(Json(result))
}

pub async fn list_job_attempts_handler(
    State(state): State<AppState>,
    ValidPath(job_id): ValidPath<String>,
) -> Result<Json<ListAttemptsResponse>, ApiError> {
    let job_id = parse_uuid("job_id", &job_id)?;
    let result = list_job_attempts(&state.pool, job_id).await?;
    Ok(Json(result))
}

/// Republishes `event.ingested` for an existing event. The operator path
/// for fan-out messages lost after commit.
pub async fn replay_event_handler(
    State(state): State<AppState>,
    ValidPath(event_id): ValidPath<String>,
) -> Result<Json<ReplayEventResponse>, ApiError> {
    let event_id = parse_uuid("event_id", &event_id)?;
    let message = load_event_message(&state.pool, event_id).await?;

    let Some(publisher) = &state.publisher else {
        return Err(ApiError::internal("broker publisher unavailable"));
    };
    publisher
        .publish_event_ingested(&message)
        .await
        .map_err(|err| ApiError::internal(format!("failed to publish event.ingested: {err}")))?;

    Ok(Json(ReplayEventResponse {
        event_id,
        published: true,
    }))
}

fn parse_limit(limit: Option<i64>) -> Result<i64, ApiError> {
    let limit = limit.unwrap_or(50);
    if !(1..=200).contains(&limit) {
        return Err(ApiError::validation("limit must be between 1 and 200"));
    }
    Ok(limit)
}

fn parse_uuid(field: &str, value: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(value).map_err(|_| ApiError::validation(format!("{field} must be a UUID")))
}

fn decode_cursor(raw: &str) -> Result<InspectorCursor, ApiError> {
    let decoded = URL_SAFE_NO_PAD
        .decode(raw)
        .map_err(|_| ApiError::validation("before must be a valid cursor"))?;
    let payload: CursorPayload = serde_json::from_slice(&decoded)
        .map_err(|_| ApiError::validation("before must be a valid cursor"))?;
    DateTime::parse_from_rfc3339(&payload.received_at)
        .map_err(|_| ApiError::validation("before must be a valid cursor"))?;
    let id = Uuid::parse_str(&payload.id)
        .map_err(|_| ApiError::validation("before must be a valid cursor"))?;
    Ok(InspectorCursor {
        received_at: payload.received_at,
        id,
    })
}

fn encode_cursor(cursor: &InspectorCursor) -> Result<String, ApiError> {
    let payload = CursorPayload {
        received_at: cursor.received_at.clone(),
        id: cursor.id.to_string(),
    };
    let encoded = serde_json::to_vec(&payload)
        .map_err(|_| ApiError::internal("failed to encode cursor"))?;
    Ok(URL_SAFE_NO_PAD.encode(encoded))
}
