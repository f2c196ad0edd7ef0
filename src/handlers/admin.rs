use axum::{Json, extract::State};
use serde::Deserialize;

use crate::{
    error::ApiError,
    extractors::{ValidPath, ValidQuery},
    state::AppState,
    types::{CircuitListResponse, CircuitResetResponse, CircuitState},
    webhook::circuit,
};

#[derive(Debug, Deserialize)]
pub struct CircuitQuery {
    state: Option<String>,
}

pub async fn list_circuit_handler(
    State(state): State<AppState>,
    ValidQuery(query): ValidQuery<CircuitQuery>,
) -> Result<Json<CircuitListResponse>, ApiError> {
    let filter = match query.state.as_deref() {
        Some(raw) => Some(
            CircuitState::parse(raw)
                .ok_or_else(|| ApiError::validation("state must be CLOSED or OPEN"))?,
        ),
        None => None,
    };

    let items = circuit::list(&state.pool, filter).await?;
    Ok(Json(CircuitListResponse { items }))
}

pub async fn reset_circuit_handler(
    State(state): State<AppState>,
    ValidPath(key): ValidPath<String>,
) -> Result<Json<CircuitResetResponse>, ApiError> {
    circuit::reset(&state.pool, &key).await?;
    Ok(Json(CircuitResetResponse {
        key,
        state: CircuitState::Closed,
    }))
}
