use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{EventStatus, Subject};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestEventRequest {
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub subject: Subject,
    #[serde(default = "default_payload")]
    pub payload: Value,
    pub occurred_at: Option<String>,
    pub idempotency_key: Option<String>,
}

fn default_payload() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestEventResponse {
    pub event_id: Uuid,
    pub status: EventStatus,
    pub enqueued_jobs: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayEventResponse {
    pub event_id: Uuid,
    pub published: bool,
}
