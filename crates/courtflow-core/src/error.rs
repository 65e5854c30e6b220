use std::fmt;

use courtflow_parser::ParserError;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigError;
use crate::model::BatchStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    NotNull,
    Check,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConstraintKind::Unique => "unique",
            ConstraintKind::ForeignKey => "foreign key",
            ConstraintKind::NotNull => "not null",
            ConstraintKind::Check => "check",
        };
        f.write_str(label)
    }
}

/// Storage failures, tagged by what the caller can do about them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("{kind} constraint violated ({}): {detail}", .constraint.as_deref().unwrap_or("unnamed"))]
    ConstraintViolation {
        kind: ConstraintKind,
        constraint: Option<String>,
        detail: String,
    },
    #[error("database connection failed: {0}")]
    Connection(String),
    #[error("database operation timed out: {0}")]
    Timeout(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Other(String),
}

impl PersistenceError {
    /// Connection and timeout failures mean later rows will fail the same way.
    pub fn is_connection_class(&self) -> bool {
        matches!(
            self,
            PersistenceError::Connection(_) | PersistenceError::Timeout(_)
        )
    }
}

// SQLSTATE classes that mean the connection itself is unusable.
const CONNECTION_EXCEPTION_CLASS: &str = "08";
const QUERY_CANCELED: &str = "57014";
const ADMIN_SHUTDOWN_CLASS: &str = "57P";

impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;

        match &err {
            sqlx::Error::Database(db) => {
                let detail = db.message().to_string();
                let constraint = db.constraint().map(str::to_string);
                let kind = match db.kind() {
                    ErrorKind::UniqueViolation => Some(ConstraintKind::Unique),
                    ErrorKind::ForeignKeyViolation => Some(ConstraintKind::ForeignKey),
                    ErrorKind::NotNullViolation => Some(ConstraintKind::NotNull),
                    ErrorKind::CheckViolation => Some(ConstraintKind::Check),
                    _ => None,
                };
                if let Some(kind) = kind {
                    return PersistenceError::ConstraintViolation {
                        kind,
                        constraint,
                        detail,
                    };
                }

                let code = db.code().map(|code| code.into_owned()).unwrap_or_default();
                if code == QUERY_CANCELED {
                    PersistenceError::Timeout(detail)
                } else if code.starts_with(CONNECTION_EXCEPTION_CLASS)
                    || code.starts_with(ADMIN_SHUTDOWN_CLASS)
                {
                    PersistenceError::Connection(detail)
                } else {
                    PersistenceError::Other(detail)
                }
            }
            sqlx::Error::PoolTimedOut => {
                PersistenceError::Timeout("timed out acquiring a pooled connection".to_string())
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => PersistenceError::Connection(err.to_string()),
            sqlx::Error::RowNotFound => PersistenceError::NotFound(err.to_string()),
            _ => PersistenceError::Other(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Backend(#[from] redis::RedisError),
    #[error("job payload could not be encoded: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("queue is unavailable")]
    Unavailable,
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("file was already imported by batch {batch_id}")]
    Duplicate { batch_id: Uuid },
    #[error("import batch {0} not found")]
    BatchNotFound(Uuid),
    #[error("batch {batch_id} is {status}; cannot {action}")]
    InvalidState {
        batch_id: Uuid,
        status: BatchStatus,
        action: &'static str,
    },
    #[error("uploaded file could not be read or written: {0}")]
    Io(#[from] std::io::Error),
    #[error("file could not be parsed: {0}")]
    Parse(#[from] ParserError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
