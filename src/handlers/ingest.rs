use axum::{Json, extract::State, http::StatusCode};
use tracing::error;

use crate::{
    error::ApiError,
    extractors::ValidJson,
    ingest::{NewEvent, insert_event},
    state::AppState,
    store::normalize_rfc3339_utc,
    types::{EventStatus, IngestEventRequest, IngestEventResponse},
};

pub async fn ingest_event_handler(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<IngestEventRequest>,
) -> Result<(StatusCode, Json<IngestEventResponse>), ApiError> {
    let new_event = validate_request(&req)?;

    let outcome = insert_event(&state.pool, &new_event).await?;

    // Post-commit publish: the row is durable either way. A lost publish is
    // logged and recoverable through the replay endpoint.
    if let Some(message) = &outcome.message
        && let Some(publisher) = &state.publisher
        && let Err(err) = publisher.publish_event_ingested(message).await
    {
        error!(
            event_id = %outcome.event_id,
            error = %err,
            "failed to publish event.ingested; replay to recover"
        );
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestEventResponse {
            event_id: outcome.event_id,
            status: EventStatus::Accepted,
            enqueued_jobs: 0,
        }),
    ))
}

fn validate_request(req: &IngestEventRequest) -> Result<NewEvent, ApiError> {
    if req.source.trim().is_empty() {
        return Err(ApiError::validation("source is required"));
    }
    if req.event_type.trim().is_empty() {
        return Err(ApiError::validation("type is required"));
    }
    if req.subject.kind.trim().is_empty() || req.subject.id.trim().is_empty() {
        return Err(ApiError::validation("subject kind and id are required"));
    }

    let occurred_at = match req.occurred_at.as_deref() {
        Some(raw) => Some(
            normalize_rfc3339_utc(raw)
                .map_err(|_| ApiError::validation("occurredAt must be RFC3339"))?,
        ),
        None => None,
    };

    let idempotency_key = req
        .idempotency_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string);

    Ok(NewEvent {
        source: req.source.clone(),
        event_type: req.event_type.clone(),
        subject: req.subject.clone(),
        payload: req.payload.clone(),
        occurred_at,
        idempotency_key,
    })
}
