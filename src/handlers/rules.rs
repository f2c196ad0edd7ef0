use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    extractors::{ValidJson, ValidPath, ValidQuery},
    rules::{create_rule, list_rules, update_rule},
    state::AppState,
    types::{CreateRuleRequest, RuleListResponse, RuleMutationResponse, UpdateRuleRequest},
};

#[derive(Debug, Deserialize)]
pub struct ListRulesQuery {
    enabled: Option<bool>,
}

pub async fn create_rule_handler(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<CreateRuleRequest>,
) -> Result<(StatusCode, Json<RuleMutationResponse>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::validation("name is required"));
    }

    let response = create_rule(&state.pool, &req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn list_rules_handler(
    State(state): State<AppState>,
    ValidQuery(query): ValidQuery<ListRulesQuery>,
) -> Result<Json<RuleListResponse>, ApiError> {
    let items = list_rules(&state.pool, query.enabled).await?;
    Ok(Json(RuleListResponse { items }))
}

pub async fn update_rule_handler(
    State(state): State<AppState>,
    ValidPath(rule_id): ValidPath<String>,
    ValidJson(req): ValidJson<UpdateRuleRequest>,
) -> Result<Json<RuleMutationResponse>, ApiError> {
    let rule_id = parse_uuid("rule_id", &rule_id)?;
    let response = update_rule(&state.pool, rule_id, &req).await?;
    Ok(Json(response))
}

fn parse_uuid(field: &str, value: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(value).map_err(|_| ApiError::validation(format!("{field} must be a UUID")))
}
