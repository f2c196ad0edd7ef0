use std::collections::BTreeMap;

use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    store::{StoreError, now_utc},
    types::{
        ActionKind, CreateRuleRequest, RuleActionItem, RuleActionSpec, RuleMatch,
        RuleMutationResponse, RuleWithActions, UpdateRuleRequest,
    },
};

pub async fn create_rule(
    pool: &SqlitePool,
    req: &CreateRuleRequest,
) -> Result<RuleMutationResponse, StoreError> {
    let now = now_utc();
    let rule_id = Uuid::new_v4();

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO rules (id, name, enabled, match_source, match_type, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(rule_id.to_string())
    .bind(&req.name)
    .bind(req.enabled)
    .bind(req.match_spec.source.as_deref())
    .bind(req.match_spec.event_type.as_deref())
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    insert_actions(&mut tx, rule_id, &req.actions).await?;

    tx.commit().await?;

    Ok(RuleMutationResponse {
        rule_id,
        enabled: req.enabled,
    })
}

pub async fn list_rules(
    pool: &SqlitePool,
    enabled: Option<bool>,
) -> Result<Vec<RuleWithActions>, StoreError> {
    let rules: Vec<RuleListRow> = match enabled {
        Some(flag) => {
            sqlx::query_as(
                r#"
                SELECT id, name, enabled, match_source, match_type
                FROM rules
                WHERE enabled = ?
                ORDER BY created_at DESC, id DESC
                "#,
            )
            .bind(flag)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as(
                r#"
                SELECT id, name, enabled, match_source, match_type
                FROM rules
                ORDER BY created_at DESC, id DESC
                "#,
            )
            .fetch_all(pool)
            .await?
        }
    };

    let actions: Vec<ActionListRow> = sqlx::query_as(
        r#"
        SELECT rule_id, kind, config, order_no
        FROM rule_actions
        ORDER BY rule_id, order_no
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut actions_by_rule: BTreeMap<String, Vec<RuleActionItem>> = BTreeMap::new();
    for row in actions {
        let kind = ActionKind::parse(&row.kind)
            .ok_or_else(|| StoreError::Parse(format!("unknown action kind: {}", row.kind)))?;
        let config: Value = serde_json::from_str(&row.config)
            .map_err(|err| StoreError::Parse(format!("invalid action config JSON: {err}")))?;
        actions_by_rule
            .entry(row.rule_id)
            .or_default()
            .push(RuleActionItem {
                kind,
                config,
                order_no: row.order_no,
            });
    }

    let mut items = Vec::with_capacity(rules.len());
    for row in rules {
        let rule_id = Uuid::parse_str(&row.id)
            .map_err(|err| StoreError::Parse(format!("invalid rule id: {err}")))?;
        items.push(RuleWithActions {
            rule_id,
            name: row.name,
            enabled: row.enabled,
            match_spec: RuleMatch {
                source: row.match_source,
                event_type: row.match_type,
            },
            actions: actions_by_rule.remove(&row.id).unwrap_or_default(),
        });
    }

    Ok(items)
}

pub async fn update_rule(
    pool: &SqlitePool,
    rule_id: Uuid,
    req: &UpdateRuleRequest,
) -> Result<RuleMutationResponse, StoreError> {
    let now = now_utc();
    let id = rule_id.to_string();

    let mut tx = pool.begin().await?;

    let existing = sqlx::query_as::<_, RuleListRow>(
        r#"
        SELECT id, name, enabled, match_source, match_type
        FROM rules
        WHERE id = ?
        "#,
    )
    .bind(&id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| StoreError::NotFound("rule not found".to_string()))?;

    let name = req.name.clone().unwrap_or(existing.name);
    let enabled = req.enabled.unwrap_or(existing.enabled);
    // A present match field overrides; an absent one keeps the stored value.
    let (match_source, match_type) = match &req.match_spec {
        Some(spec) => (
            spec.source.clone().or(existing.match_source),
            spec.event_type.clone().or(existing.match_type),
        ),
        None => (existing.match_source, existing.match_type),
    };

    sqlx::query(
        r#"
        UPDATE rules
        SET name = ?, enabled = ?, match_source = ?, match_type = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&name)
    .bind(enabled)
    .bind(match_source.as_deref())
    .bind(match_type.as_deref())
    .bind(&now)
    .bind(&id)
    .execute(&mut *tx)
    .await?;

    if let Some(actions) = &req.actions {
        sqlx::query("DELETE FROM rule_actions WHERE rule_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        insert_actions(&mut tx, rule_id, actions).await?;
    }

    tx.commit().await?;

    Ok(RuleMutationResponse { rule_id, enabled })
}

async fn insert_actions(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    rule_id: Uuid,
    actions: &[RuleActionSpec],
) -> Result<(), StoreError> {
    for action in actions {
        let config = serde_json::to_string(&action.config)
            .map_err(|err| StoreError::Parse(format!("invalid action config JSON: {err}")))?;
        sqlx::query(
            r#"
            INSERT INTO rule_actions (id, rule_id, kind, config, order_no)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(rule_id.to_string())
        .bind(action.kind.as_str())
        .bind(&config)
        .bind(action.order_no)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[derive(sqlx::FromRow)]
struct RuleListRow {
    id: String,
    name: String,
    enabled: bool,
    match_source: Option<String>,
    match_type: Option<String>,
}

#[derive(sqlx::FromRow)]
struct ActionListRow {
    rule_id: String,
    kind: String,
    config: String,
    order_no: i64,
}
