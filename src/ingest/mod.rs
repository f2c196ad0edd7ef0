mod store;

pub use store::{IngestOutcome, NewEvent, insert_event, load_event_message};
