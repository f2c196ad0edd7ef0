#![allow(clippy::expect_used, clippy::unwrap_used)]

use hub::{
    broker::EventIngested,
    engine::{build_context, render_template, rule_matches},
    types::{Rule, Subject},
};
use serde_json::json;
use uuid::Uuid;

fn rule(enabled: bool, match_source: Option<&str>, match_type: Option<&str>) -> Rule {
    Rule {
        id: Uuid::new_v4(),
        name: "test".to_string(),
        enabled,
        match_source: match_source.map(str::to_string),
        match_type: match_type.map(str::to_string),
    }
}

fn message() -> EventIngested {
    EventIngested {
        event_id: Uuid::new_v4(),
        source: "iot".to_string(),
        event_type: "temp.high".to_string(),
        subject: Subject {
            kind: "sensor".to_string(),
            id: "S-9".to_string(),
        },
        payload: json!({ "user": { "email": "ops@example.com" }, "reading": 41.5 }),
        occurred_at: "2026-08-01T10:00:00.000Z".to_string(),
        received_at: "2026-08-01T10:00:01.000Z".to_string(),
    }
}

#[test]
fn disabled_rule_never_matches() {
    assert!(!rule_matches(&rule(false, None, None), "iot", "temp.high"));
}

#[test]
fn absent_fields_are_wildcards() {
    assert!(rule_matches(&rule(true, None, None), "iot", "temp.high"));
    assert!(rule_matches(&rule(true, Some("iot"), None), "iot", "anything"));
    assert!(rule_matches(
        &rule(true, None, Some("temp.high")),
        "other",
        "temp.high"
    ));
}

#[test]
fn present_fields_require_exact_equality() {
    assert!(rule_matches(
        &rule(true, Some("iot"), Some("temp.high")),
        "iot",
        "temp.high"
    ));
    assert!(!rule_matches(&rule(true, Some("iot"), None), "web", "temp.high"));
    assert!(!rule_matches(
        &rule(true, None, Some("temp.high")),
        "iot",
        "temp.low"
    ));
    // No prefix or glob semantics.
    assert!(!rule_matches(&rule(true, Some("io"), None), "iot", "temp.high"));
}

#[test]
fn context_has_the_fixed_shape() {
    let msg = message();
    let ctx = build_context(&msg);

    assert_eq!(ctx["eventId"], json!(msg.event_id));
    assert_eq!(ctx["source"], json!("iot"));
    assert_eq!(ctx["type"], json!("temp.high"));
    assert_eq!(ctx["subject"], json!({ "kind": "sensor", "id": "S-9" }));
    assert_eq!(ctx["payload"]["user"]["email"], json!("ops@example.com"));
    assert_eq!(ctx["occurredAt"], json!("2026-08-01T10:00:00.000Z"));
    // receivedAt is deliberately not part of the template context.
    assert!(ctx.get("receivedAt").is_none());
}

#[test]
fn tokens_substitute_dotted_paths() {
    let ctx = build_context(&message());
    let template = json!({
        "url": "https://h/x",
        "body": { "id": "{{subject.id}}", "email": "{{payload.user.email}}" }
    });

    let rendered = render_template(&template, &ctx);

    assert_eq!(rendered["url"], json!("https://h/x"));
    assert_eq!(rendered["body"]["id"], json!("S-9"));
    assert_eq!(rendered["body"]["email"], json!("ops@example.com"));
}

#[test]
fn whitespace_inside_braces_is_trimmed() {
    let ctx = build_context(&message());
    let rendered = render_template(&json!("{{ subject.id }}"), &ctx);
    assert_eq!(rendered, json!("S-9"));
}

#[test]
fn missing_paths_render_as_empty_string() {
    let ctx = build_context(&message());
    let rendered = render_template(&json!("id={{missing.path}}!"), &ctx);
    assert_eq!(rendered, json!("id=!"));
}

#[test]
fn traversing_a_non_map_renders_as_empty_string() {
    let ctx = build_context(&message());
    let rendered = render_template(&json!("{{subject.id.deeper}}"), &ctx);
    assert_eq!(rendered, json!(""));
}

#[test]
fn non_string_scalars_pass_through_unchanged() {
    let ctx = build_context(&message());
    let template = json!({ "limit": 5, "alert": true, "note": null });
    assert_eq!(render_template(&template, &ctx), template);
}

#[test]
fn non_string_values_are_stringified_inside_tokens() {
    let ctx = build_context(&message());
    let rendered = render_template(&json!("reading={{payload.reading}}"), &ctx);
    assert_eq!(rendered, json!("reading=41.5"));
}

#[test]
fn sequences_render_recursively() {
    let ctx = build_context(&message());
    let template = json!({ "targets": ["{{subject.kind}}", "{{subject.id}}", 7] });
    let rendered = render_template(&template, &ctx);
    assert_eq!(rendered["targets"], json!(["sensor", "S-9", 7]));
}

#[test]
fn multiple_tokens_in_one_string() {
    let ctx = build_context(&message());
    let rendered = render_template(&json!("{{source}}/{{type}}"), &ctx);
    assert_eq!(rendered, json!("iot/temp.high"));
}

#[test]
fn rendering_is_idempotent_for_resolved_tokens() {
    let ctx = build_context(&message());
    let template = json!({ "id": "{{subject.id}}", "static": "keep" });

    let once = render_template(&template, &ctx);
    let twice = render_template(&once, &ctx);

    assert_eq!(once, twice);
}
