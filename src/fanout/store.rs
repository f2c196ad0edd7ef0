use std::collections::BTreeMap;

use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    broker::EventIngested,
    engine,
    executor::finalize_event,
    store::{StoreError, now_utc},
    types::Rule,
};

/// The fan-out transaction: mark the event PROCESSING, evaluate every
/// enabled rule, and insert one QUEUED job per matching action with the
/// rendered payload. Returns the new job ids for post-commit publishing.
///
/// An event that matched no rule is finalized in the same transaction so it
/// lands on DONE instead of idling in PROCESSING forever.
pub async fn create_jobs_for_event(
    pool: &SqlitePool,
    max_attempts_default: i64,
    message: &EventIngested,
) -> Result<Vec<Uuid>, StoreError> {
    let now = now_utc();
    let event_id = message.event_id.to_string();

    let mut tx = pool.begin().await?;

    // Status only ever advances; a redelivered message for a finished event
    // must not drag it back to PROCESSING or fan out twice.
    let marked = sqlx::query(
        r#"
        UPDATE events
        SET status = 'PROCESSING'
        WHERE id = ? AND status IN ('ACCEPTED', 'PROCESSING')
        "#,
    )
    .bind(&event_id)
    .execute(&mut *tx)
    .await?;

    if marked.rows_affected() == 0 {
        tx.commit().await?;
        return Ok(Vec::new());
    }

    let rules: Vec<RuleRow> = sqlx::query_as(
        r#"
        SELECT id, name, enabled, match_source, match_type
        FROM rules
        WHERE enabled = 1
        "#,
    )
    .fetch_all(&mut *tx)
    .await?;

    let actions: Vec<ActionRow> = sqlx::query_as(
        r#"
        SELECT id, rule_id, kind, config, order_no
        FROM rule_actions
        ORDER BY rule_id, order_no
        "#,
    )
    .fetch_all(&mut *tx)
    .await?;

    let mut actions_by_rule: BTreeMap<String, Vec<ActionRow>> = BTreeMap::new();
    for action in actions {
        actions_by_rule
            .entry(action.rule_id.clone())
            .or_default()
            .push(action);
    }

    let ctx = engine::build_context(message);
    let mut created = Vec::new();

    for row in &rules {
        let rule = Rule {
            id: Uuid::parse_str(&row.id)
                .map_err(|err| StoreError::Parse(format!("invalid rule id: {err}")))?,
            name: row.name.clone(),
            enabled: row.enabled,
            match_source: row.match_source.clone(),
            match_type: row.match_type.clone(),
        };
        if !engine::rule_matches(&rule, &message.source, &message.event_type) {
            continue;
        }

        let Some(rule_actions) = actions_by_rule.get(&row.id) else {
            continue;
        };

        for action in rule_actions {
            let config: Value = serde_json::from_str(&action.config)
                .map_err(|err| StoreError::Parse(format!("invalid action config JSON: {err}")))?;
            let payload = engine::render_template(&config, &ctx);
            let payload_json = serde_json::to_string(&payload)
                .map_err(|err| StoreError::Parse(format!("invalid rendered payload: {err}")))?;

            let job_id = Uuid::new_v4();
            sqlx::query(
                r#"
                INSERT INTO jobs (
                    id, event_id, rule_id, action_id, kind, status,
                    attempts, max_attempts, payload, created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, 'QUEUED', 0, ?, ?, ?, ?)
                "#,
            )
            .bind(job_id.to_string())
            .bind(&event_id)
            .bind(&row.id)
            .bind(&action.id)
            .bind(&action.kind)
            .bind(max_attempts_default)
            .bind(&payload_json)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            created.push(job_id);
        }
    }

    if created.is_empty() {
        finalize_event(&mut *tx, &event_id).await?;
    }

    tx.commit().await?;

    Ok(created)
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    id: String,
    name: String,
    enabled: bool,
    match_source: Option<String>,
    match_type: Option<String>,
}

#[derive(sqlx::FromRow)]
#[allow(dead_code)]
struct ActionRow {
    id: String,
    rule_id: String,
    kind: String,
    config: String,
    order_no: i64,
}
