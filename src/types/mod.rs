pub mod api_error;
pub mod circuit;
pub mod event;
pub mod ingest;
pub mod inspector;
pub mod job;
pub mod job_attempt;
pub mod rule;

#[allow(unused_imports)]
pub use api_error::{ApiErrorCode, ApiErrorResponse};
#[allow(unused_imports)]
pub use circuit::{CircuitBreakerEntry, CircuitListResponse, CircuitResetResponse, CircuitState};
#[allow(unused_imports)]
pub use event::{Event, EventStatus, Subject};
#[allow(unused_imports)]
pub use ingest::{IngestEventRequest, IngestEventResponse, ReplayEventResponse};
#[allow(unused_imports)]
pub use inspector::{EventSummary, GetEventResponse, ListAttemptsResponse, ListEventsResponse};
#[allow(unused_imports)]
pub use job::{Job, JobStatus};
#[allow(unused_imports)]
pub use job_attempt::{AttemptStatus, JobAttempt};
#[allow(unused_imports)]
pub use rule::{
    ActionKind, CreateRuleRequest, Rule, RuleActionItem, RuleActionSpec, RuleListResponse,
    RuleMatch, RuleMutationResponse, RuleWithActions, UpdateRuleRequest,
};
