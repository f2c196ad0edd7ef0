use axum::{
    body::Body,
    extract::State,
    http::{Request, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::{error::ApiError, state::AppState};

/// Bearer-token gate for the admin and inspector routes. When no token is
/// configured the gate is disabled and every request passes through.
pub async fn admin_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected_token) = &state.admin_api_token else {
        return Ok(next.run(req).await);
    };

    let provided_token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(strip_bearer);

    let Some(provided_token) = provided_token else {
        return Err(ApiError::unauthorized(
            "missing or invalid Authorization header",
        ));
    };

    if provided_token.is_empty()
        || !constant_time_eq(expected_token.as_bytes(), provided_token.as_bytes())
    {
        return Err(ApiError::unauthorized("invalid token"));
    }

    Ok(next.run(req).await)
}

fn strip_bearer(value: &str) -> Option<&str> {
    let value = value.trim();
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        Some(token.trim())
    } else {
        None
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
