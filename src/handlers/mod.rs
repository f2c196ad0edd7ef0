pub mod admin;
pub mod ingest;
pub mod inspector;
pub mod rules;

use axum::{
    Router, middleware,
    routing::{get, patch, post},
};

use crate::{auth::admin_auth, state::AppState};

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/v1/inspector/events", get(inspector::list_events_handler))
        .route(
            "/api/v1/inspector/events/:event_id",
            get(inspector::get_event_handler),
        )
        .route(
            "/api/v1/inspector/events/:event_id/replay",
            post(inspector::replay_event_handler),
        )
        .route(
            "/api/v1/inspector/jobs/:job_id/attempts",
            get(inspector::list_job_attempts_handler),
        )
        .route("/api/v1/admin/circuit", get(admin::list_circuit_handler))
        .route(
            "/api/v1/admin/circuit/:key/reset",
            post(admin::reset_circuit_handler),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth));

    Router::new()
        .route("/api/v1/events", post(ingest::ingest_event_handler))
        .route(
            "/api/v1/rules",
            get(rules::list_rules_handler).post(rules::create_rule_handler),
        )
        .route("/api/v1/rules/:rule_id", patch(rules::update_rule_handler))
        .merge(protected)
        .with_state(state)
}
