use serde::Serialize;
use uuid::Uuid;

use super::{Event, EventStatus, Job, JobAttempt, Subject};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    pub id: Uuid,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub subject: Subject,
    pub status: EventStatus,
    pub occurred_at: String,
    pub received_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEventsResponse {
    pub events: Vec<EventSummary>,
    pub next_before: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetEventResponse {
    pub event: Event,
    pub jobs: Vec<Job>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListAttemptsResponse {
    pub attempts: Vec<JobAttempt>,
}
