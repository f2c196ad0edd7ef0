use chrono::{DateTime, SecondsFormat, Utc};

/// Error surface shared by every store module.
#[derive(Debug)]
pub enum StoreError {
    Db(sqlx::Error),
    Conflict(String),
    NotFound(String),
    Parse(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db)
                if db.kind() == sqlx::error::ErrorKind::UniqueViolation =>
            {
                Self::Conflict(db.message().to_string())
            }
            other => Self::Db(other),
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "database error: {err}"),
            Self::Conflict(message) => write!(f, "conflict: {message}"),
            Self::NotFound(message) => write!(f, "not found: {message}"),
            Self::Parse(message) => write!(f, "parse error: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// All timestamps are stored as fixed-width RFC3339 UTC strings so that
/// lexicographic comparison in SQL matches chronological order.
pub fn format_utc(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_utc() -> String {
    format_utc(Utc::now())
}

pub fn normalize_rfc3339_utc(value: &str) -> Result<String, StoreError> {
    let parsed = DateTime::parse_from_rfc3339(value)
        .map_err(|err| StoreError::Parse(format!("invalid timestamp: {err}")))?;
    Ok(format_utc(parsed.with_timezone(&Utc)))
}
