//! Rule predicate and template rendering. Both are pure; the fan-out
//! consumer feeds them rows and an event-derived context.

use serde_json::{Map, Value};

use crate::{broker::EventIngested, types::Rule};

/// A rule matches when it is enabled and every present match dimension
/// equals the event's value. Absent dimensions are wildcards.
pub fn rule_matches(rule: &Rule, source: &str, event_type: &str) -> bool {
    if !rule.enabled {
        return false;
    }
    if let Some(match_source) = rule.match_source.as_deref()
        && match_source != source
    {
        return false;
    }
    if let Some(match_type) = rule.match_type.as_deref()
        && match_type != event_type
    {
        return false;
    }
    true
}

/// The fixed context visible to action templates.
pub fn build_context(event: &EventIngested) -> Value {
    serde_json::json!({
        "eventId": event.event_id,
        "source": event.source,
        "type": event.event_type,
        "subject": { "kind": event.subject.kind, "id": event.subject.id },
        "payload": event.payload,
        "occurredAt": event.occurred_at,
    })
}

/// Deep-copies `value`, substituting `{{ dotted.path }}` tokens inside every
/// string against `ctx`. Missing paths render as the empty string.
pub fn render_template(value: &Value, ctx: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut rendered = Map::with_capacity(map.len());
            for (key, entry) in map {
                rendered.insert(key.clone(), render_template(entry, ctx));
            }
            Value::Object(rendered)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| render_template(item, ctx)).collect())
        }
        Value::String(text) => Value::String(render_str(text, ctx)),
        other => other.clone(),
    }
}

fn render_str(text: &str, ctx: &Value) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        let Some(end) = rest[start + 2..].find("}}") else {
            break;
        };
        out.push_str(&rest[..start]);
        let path = rest[start + 2..start + 2 + end].trim();
        if let Some(value) = resolve_path(ctx, path) {
            out.push_str(&stringify(value));
        }
        rest = &rest[start + 2 + end + 2..];
    }

    out.push_str(rest);
    out
}

fn resolve_path<'a>(ctx: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = ctx;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
