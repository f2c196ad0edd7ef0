use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub name: String,
    pub enabled: bool,
    pub match_source: Option<String>,
    pub match_type: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Email,
    Webhook,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "EMAIL",
            Self::Webhook => "WEBHOOK",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "EMAIL" => Some(Self::Email),
            "WEBHOOK" => Some(Self::Webhook),
            _ => None,
        }
    }
}

/// Wildcard-by-absence match predicate: a `None` dimension matches anything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleMatch {
    pub source: Option<String>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleActionSpec {
    pub kind: ActionKind,
    #[serde(default = "default_config")]
    pub config: Value,
    #[serde(default)]
    pub order_no: i64,
}

fn default_config() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRuleRequest {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, rename = "match")]
    pub match_spec: RuleMatch,
    #[serde(default)]
    pub actions: Vec<RuleActionSpec>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRuleRequest {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    #[serde(rename = "match")]
    pub match_spec: Option<RuleMatch>,
    pub actions: Option<Vec<RuleActionSpec>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleWithActions {
    pub rule_id: Uuid,
    pub name: String,
    pub enabled: bool,
    #[serde(rename = "match")]
    pub match_spec: RuleMatch,
    pub actions: Vec<RuleActionItem>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleActionItem {
    pub kind: ActionKind,
    pub config: Value,
    pub order_no: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleListResponse {
    pub items: Vec<RuleWithActions>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMutationResponse {
    pub rule_id: Uuid,
    pub enabled: bool,
}
