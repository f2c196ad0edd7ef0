use sqlx::SqlitePool;

use crate::{broker::Publisher, config::HubConfig};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: HubConfig,
    /// Absent only in tests; the api binary always wires a live publisher.
    pub publisher: Option<Publisher>,
    pub admin_api_token: Option<String>,
}
