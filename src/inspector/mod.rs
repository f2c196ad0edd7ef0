mod store;

pub use store::{
    InspectorCursor, ListEventsParams, ListEventsResult, get_event, list_events,
    list_job_attempts,
};
