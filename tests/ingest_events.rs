#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use hub::{
    handlers,
    ingest::{NewEvent, insert_event},
    types::Subject,
};
use serde_json::{Value, json};

use common::{setup_db, test_state};

fn new_event(idempotency_key: Option<&str>) -> NewEvent {
    NewEvent {
        source: "iot".to_string(),
        event_type: "temp.high".to_string(),
        subject: Subject {
            kind: "sensor".to_string(),
            id: "S-9".to_string(),
        },
        payload: json!({ "reading": 41.5 }),
        occurred_at: None,
        idempotency_key: idempotency_key.map(str::to_string),
    }
}

async fn response_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).expect("response is JSON")
}

#[tokio::test]
async fn insert_creates_accepted_row_and_message() {
    let db = setup_db().await;

    let outcome = insert_event(&db.pool, &new_event(None)).await.expect("insert");

    assert!(!outcome.deduplicated);
    let message = outcome.message.expect("fresh insert carries a message");
    assert_eq!(message.event_id, outcome.event_id);
    assert_eq!(message.source, "iot");
    assert_eq!(message.event_type, "temp.high");
    assert_eq!(message.occurred_at, message.received_at);

    let (status, occurred_at): (String, String) =
        sqlx::query_as("SELECT status, occurred_at FROM events WHERE id = ?")
            .bind(outcome.event_id.to_string())
            .fetch_one(&db.pool)
            .await
            .expect("event row");
    assert_eq!(status, "ACCEPTED");
    assert_eq!(occurred_at, message.occurred_at);
}

#[tokio::test]
async fn same_idempotency_key_returns_existing_event() {
    let db = setup_db().await;

    let first = insert_event(&db.pool, &new_event(Some("k1"))).await.expect("first");
    let second = insert_event(&db.pool, &new_event(Some("k1"))).await.expect("second");

    assert_eq!(first.event_id, second.event_id);
    assert!(!first.deduplicated);
    assert!(second.deduplicated);
    assert!(second.message.is_none(), "dedupe must not republish");

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
        .fetch_one(&db.pool)
        .await
        .expect("count");
    assert_eq!(count, 1);
}

#[tokio::test]
async fn different_keys_create_distinct_events() {
    let db = setup_db().await;

    let first = insert_event(&db.pool, &new_event(Some("k1"))).await.expect("first");
    let second = insert_event(&db.pool, &new_event(Some("k2"))).await.expect("second");

    assert_ne!(first.event_id, second.event_id);
}

#[tokio::test]
async fn ingest_endpoint_returns_202_with_event_id() {
    let db = setup_db().await;
    let app = handlers::router(test_state(db.pool.clone()));

    let body = json!({
        "source": "iot",
        "type": "temp.high",
        "subject": { "kind": "sensor", "id": "S-9" },
        "payload": { "reading": 41.5 }
    });
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/events")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = tower::ServiceExt::oneshot(app, request).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = response_json(response).await;
    assert_eq!(json["status"], "ACCEPTED");
    assert_eq!(json["enqueuedJobs"], 0);
    assert!(json["eventId"].as_str().is_some());
}

#[tokio::test]
async fn ingest_endpoint_is_idempotent_per_key() {
    let db = setup_db().await;
    let state = test_state(db.pool.clone());

    let body = json!({
        "source": "iot",
        "type": "temp.high",
        "subject": { "kind": "sensor", "id": "S-9" },
        "idempotencyKey": "k1"
    })
    .to_string();

    let mut event_ids = Vec::new();
    for _ in 0..2 {
        let app = handlers::router(state.clone());
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/events")
            .header("content-type", "application/json")
            .body(Body::from(body.clone()))
            .unwrap();
        let response = tower::ServiceExt::oneshot(app, request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = response_json(response).await;
        event_ids.push(json["eventId"].as_str().unwrap().to_string());
    }

    assert_eq!(event_ids[0], event_ids[1]);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
        .fetch_one(&db.pool)
        .await
        .expect("count");
    assert_eq!(count, 1);
}

#[tokio::test]
async fn missing_source_is_rejected() {
    let db = setup_db().await;
    let app = handlers::router(test_state(db.pool));

    let body = json!({
        "source": "  ",
        "type": "temp.high",
        "subject": { "kind": "sensor", "id": "S-9" }
    });
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/events")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = tower::ServiceExt::oneshot(app, request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalid_occurred_at_is_rejected() {
    let db = setup_db().await;
    let app = handlers::router(test_state(db.pool));

    let body = json!({
        "source": "iot",
        "type": "temp.high",
        "subject": { "kind": "sensor", "id": "S-9" },
        "occurredAt": "yesterday"
    });
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/events")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = tower::ServiceExt::oneshot(app, request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn occurred_at_is_normalized_to_utc() {
    let db = setup_db().await;

    let mut event = new_event(None);
    event.occurred_at = Some("2026-08-01T12:00:00.000Z".to_string());
    let outcome = insert_event(&db.pool, &event).await.expect("insert");

    let message = outcome.message.expect("message");
    assert_eq!(message.occurred_at, "2026-08-01T12:00:00.000Z");
    assert_ne!(message.occurred_at, message.received_at);
}
