mod store;

pub use store::{create_rule, list_rules, update_rule};
