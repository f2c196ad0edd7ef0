#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use hub::handlers;
use serde_json::{Value, json};

use common::{setup_db, test_state};

async fn response_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).expect("response is JSON")
}

fn post_rule(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/rules")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn create_rule_inserts_rule_and_ordered_actions() {
    let db = setup_db().await;
    let app = handlers::router(test_state(db.pool.clone()));

    let body = json!({
        "name": "high temp alerts",
        "match": { "source": "iot", "type": "temp.high" },
        "actions": [
            { "kind": "WEBHOOK", "config": { "url": "https://h/x" }, "orderNo": 1 },
            { "kind": "EMAIL", "config": { "to": "ops@example.com" }, "orderNo": 0 }
        ]
    });

    let response = tower::ServiceExt::oneshot(app, post_rule(&body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let created = response_json(response).await;
    assert_eq!(created["enabled"], json!(true));
    let rule_id = created["ruleId"].as_str().expect("ruleId");

    let actions: Vec<(String, i64)> = sqlx::query_as(
        "SELECT kind, order_no FROM rule_actions WHERE rule_id = ? ORDER BY order_no",
    )
    .bind(rule_id)
    .fetch_all(&db.pool)
    .await
    .expect("actions");
    assert_eq!(
        actions,
        vec![("EMAIL".to_string(), 0), ("WEBHOOK".to_string(), 1)]
    );
}

#[tokio::test]
async fn create_rule_rejects_unknown_action_kind() {
    let db = setup_db().await;
    let app = handlers::router(test_state(db.pool));

    let body = json!({
        "name": "bad",
        "actions": [{ "kind": "CARRIER_PIGEON", "config": {} }]
    });

    let response = tower::ServiceExt::oneshot(app, post_rule(&body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_rule_requires_a_name() {
    let db = setup_db().await;
    let app = handlers::router(test_state(db.pool));

    let response = tower::ServiceExt::oneshot(app, post_rule(&json!({ "name": " " })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_rules_returns_match_and_actions() {
    let db = setup_db().await;
    let state = test_state(db.pool.clone());

    let body = json!({
        "name": "R1",
        "enabled": true,
        "match": { "source": "iot" },
        "actions": [{ "kind": "EMAIL", "config": { "to": "ops" }, "orderNo": 0 }]
    });
    let create = tower::ServiceExt::oneshot(handlers::router(state.clone()), post_rule(&body))
        .await
        .unwrap();
    assert_eq!(create.status(), StatusCode::CREATED);

    let request = Request::builder()
        .uri("/api/v1/rules")
        .body(Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(handlers::router(state), request)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let listed = response_json(response).await;
    let items = listed["items"].as_array().expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["name"], json!("R1"));
    assert_eq!(items[0]["match"]["source"], json!("iot"));
    assert_eq!(items[0]["match"]["type"], Value::Null);
    assert_eq!(items[0]["actions"][0]["kind"], json!("EMAIL"));
}

#[tokio::test]
async fn list_rules_filters_by_enabled() {
    let db = setup_db().await;
    let state = test_state(db.pool.clone());

    for (name, enabled) in [("on", true), ("off", false)] {
        let body = json!({ "name": name, "enabled": enabled });
        let response = tower::ServiceExt::oneshot(handlers::router(state.clone()), post_rule(&body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let request = Request::builder()
        .uri("/api/v1/rules?enabled=false")
        .body(Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(handlers::router(state), request)
        .await
        .unwrap();

    let listed = response_json(response).await;
    let items = listed["items"].as_array().expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["name"], json!("off"));
}

#[tokio::test]
async fn update_rule_merges_fields_and_replaces_actions() {
    let db = setup_db().await;
    let state = test_state(db.pool.clone());

    let body = json!({
        "name": "R1",
        "match": { "source": "iot", "type": "temp.high" },
        "actions": [{ "kind": "EMAIL", "config": { "to": "ops" }, "orderNo": 0 }]
    });
    let create = tower::ServiceExt::oneshot(handlers::router(state.clone()), post_rule(&body))
        .await
        .unwrap();
    let created = response_json(create).await;
    let rule_id = created["ruleId"].as_str().expect("ruleId").to_string();

    let patch_body = json!({
        "enabled": false,
        "actions": [
            { "kind": "WEBHOOK", "config": { "url": "https://h/y" }, "orderNo": 0 },
            { "kind": "WEBHOOK", "config": { "url": "https://h/z" }, "orderNo": 1 }
        ]
    });
    let patch = Request::builder()
        .method("PATCH")
        .uri(format!("/api/v1/rules/{rule_id}"))
        .header("content-type", "application/json")
        .body(Body::from(patch_body.to_string()))
        .unwrap();
    let response = tower::ServiceExt::oneshot(handlers::router(state), patch)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let patched = response_json(response).await;
    assert_eq!(patched["enabled"], json!(false));

    let (name, enabled, match_source): (String, bool, Option<String>) =
        sqlx::query_as("SELECT name, enabled, match_source FROM rules WHERE id = ?")
            .bind(&rule_id)
            .fetch_one(&db.pool)
            .await
            .expect("rule row");
    assert_eq!(name, "R1", "absent fields keep their stored value");
    assert!(!enabled);
    assert_eq!(match_source.as_deref(), Some("iot"));

    let action_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM rule_actions WHERE rule_id = ?")
            .bind(&rule_id)
            .fetch_one(&db.pool)
            .await
            .expect("count");
    assert_eq!(action_count, 2, "actions are replaced wholesale");
}

#[tokio::test]
async fn update_unknown_rule_is_not_found() {
    let db = setup_db().await;
    let app = handlers::router(test_state(db.pool));

    let patch = Request::builder()
        .method("PATCH")
        .uri(format!("/api/v1/rules/{}", uuid::Uuid::new_v4()))
        .header("content-type", "application/json")
        .body(Body::from(json!({ "enabled": false }).to_string()))
        .unwrap();
    let response = tower::ServiceExt::oneshot(app, patch).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
