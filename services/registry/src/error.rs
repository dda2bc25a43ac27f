use std::time::Duration;
use thiserror::Error;

/// PostgreSQL SQLSTATE for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";
/// PostgreSQL SQLSTATE for `exclusion_violation`.
const EXCLUSION_VIOLATION: &str = "23P01";

/// Failure of a single file's ingestion. Every variant is contained to that file.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unknown source file '{0}'")]
    UnknownSource(String),

    #[error("fetch failed for {source_id}: {reason}")]
    Fetch { source_id: String, reason: String },

    #[error("unexpected file format for {source_id}: {reason}")]
    Format { source_id: String, reason: String },

    #[error("i/o error while reading {source_id}: {reason}")]
    Io { source_id: String, reason: String },

    #[error("no valid rows in {source_id}, partition left untouched")]
    EmptySource { source_id: String },

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("version cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("ingestion of {source_id} exceeded {limit:?}")]
    Timeout { source_id: String, limit: Duration },
}

impl IngestError {
    pub fn fetch(source_id: &str, reason: impl ToString) -> Self {
        Self::Fetch {
            source_id: source_id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn format(source_id: &str, reason: impl ToString) -> Self {
        Self::Format {
            source_id: source_id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn io(source_id: &str, reason: impl ToString) -> Self {
        Self::Io {
            source_id: source_id.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Short status label used in logs and the run log.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownSource(_) => "unknown_source",
            Self::Fetch { .. } => "fetch",
            Self::Format { .. } => "format",
            Self::Io { .. } => "io",
            Self::EmptySource { .. } => "empty_source",
            Self::Constraint(_) => "constraint",
            Self::Persistence(_) => "persistence",
            Self::Cache(_) => "cache",
            Self::Timeout { .. } => "timeout",
        }
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            let code = db.code();
            if matches!(code.as_deref(), Some(UNIQUE_VIOLATION) | Some(EXCLUSION_VIOLATION)) {
                let detail = match db.constraint() {
                    Some(name) => format!("{} ({})", db.message(), name),
                    None => db.message().to_string(),
                };
                return Self::Constraint(detail);
            }
        }
        Self::Persistence(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Lookup failures. A number that is simply not registered is `Ok(None)`, not an error.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("invalid subscriber number: {0}")]
    InvalidNumber(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} env var missing")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}
