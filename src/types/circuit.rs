use serde::{Deserialize, Serialize};

/// Per-destination breaker row, keyed by URL authority (`host[:port]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerEntry {
    pub key: String,
    pub state: CircuitState,
    pub failure_count: i64,
    pub opened_at: Option<String>,
    pub last_failure_at: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CLOSED" => Some(Self::Closed),
            "OPEN" => Some(Self::Open),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitListResponse {
    pub items: Vec<CircuitBreakerEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitResetResponse {
    pub key: String,
    pub state: CircuitState,
}
