use chrono::NaiveDate;
use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Event source unavailable after {attempts} attempt(s): {reason}")]
    SourceUnavailable { attempts: u32, reason: String },

    #[error("Invalid date range: end {end} is before start {start}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("Invalid parameter {name}: '{value}'")]
    InvalidParameter { name: &'static str, value: String },

    #[error("Unknown time bucket '{0}' (expected day, week, month or quarter)")]
    UnknownTimeBucket(String),

    #[error("Invalid threshold set '{name}': {reason}")]
    InvalidThresholds { name: String, reason: String },

    #[error("Data integrity violation in '{query}': {detail}")]
    DataIntegrity { query: String, detail: String },

    #[error("Cached value for '{query}' has a different type than requested")]
    CacheTypeMismatch { query: String },

    #[error("Render cancelled before the query completed")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MetricsError {
    /// Whether retrying the same read could succeed.
    /// Connection, lock and I/O failures from the warehouse qualify;
    /// bad SQL, bad parameters and integrity findings never do.
    pub fn is_transient(&self) -> bool {
        match self {
            MetricsError::SourceUnavailable { .. } => true,
            MetricsError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::CannotOpen
                    | ErrorCode::SystemIoFailure
            ),
            _ => false,
        }
    }
}

pub type MetricsResult<T> = Result<T, MetricsError>;
