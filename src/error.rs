use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ColumnId, TaskId};

/// Main error type for the positioning service
#[derive(Error, Debug)]
pub enum CardflowError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Request errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Version conflict on task {task_id}: expected {expected}, found {current}")]
    Conflict {
        task_id: String,
        expected: i64,
        current: i64,
    },

    #[error("Column {column_id} is at capacity: {current}/{limit}")]
    Capacity {
        column_id: String,
        current: u32,
        limit: u32,
    },

    // Infrastructure errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Transport error: {0}")]
    Transport(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CardflowError {
    /// Failures worth retrying with backoff: the request itself was fine.
    pub fn is_transient(&self) -> bool {
        match self {
            CardflowError::Storage(_) | CardflowError::Io(_) => true,
            CardflowError::Database(sqlx::Error::Database(db)) => {
                // serialization_failure, deadlock_detected
                matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
            }
            CardflowError::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}

/// Result type alias for CardflowError
pub type Result<T> = std::result::Result<T, CardflowError>;

/// Failure of a single move, reported only to the client that asked for it
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum MoveError {
    /// Malformed request; never retried
    #[error("Invalid move: {message}")]
    Validation { message: String },

    /// Caller's version is stale or retries ran out; refetch and resubmit
    #[error("Version conflict on task {task_id}: expected {expected}, found {current}")]
    Conflict {
        task_id: TaskId,
        expected: i64,
        current: i64,
    },

    /// A reference sibling left the destination cell; refetch and resubmit
    #[error("Reference task {task_id} is no longer in the destination cell")]
    StaleReference { task_id: TaskId },

    #[error("Column {column_id} is at capacity: {current}/{limit}")]
    Capacity {
        column_id: ColumnId,
        current: u32,
        limit: u32,
    },

    /// Cell kept changing under a move or rebalance until the retry bound
    /// ran out
    #[error("Column {column_id} is too busy, retry later")]
    Contended { column_id: ColumnId },

    /// Store stayed unavailable through every retry
    #[error("Storage unavailable: {message}")]
    Storage { message: String },
}

impl MoveError {
    pub fn validation(message: impl Into<String>) -> Self {
        MoveError::Validation {
            message: message.into(),
        }
    }

    /// Short machine-readable category
    pub fn code(&self) -> &'static str {
        match self {
            MoveError::Validation { .. } => "validation",
            MoveError::Conflict { .. }
            | MoveError::StaleReference { .. }
            | MoveError::Contended { .. } => "conflict",
            MoveError::Capacity { .. } => "capacity",
            MoveError::Storage { .. } => "storage",
        }
    }
}

impl From<CardflowError> for MoveError {
    /// Store and lookup failures seen while handling a move
    fn from(err: CardflowError) -> Self {
        match err {
            CardflowError::Validation(message) | CardflowError::NotFound(message) => {
                MoveError::Validation { message }
            }
            CardflowError::Conflict {
                task_id,
                expected,
                current,
            } => MoveError::Conflict {
                task_id: task_id.into(),
                expected,
                current,
            },
            CardflowError::Capacity {
                column_id,
                current,
                limit,
            } => MoveError::Capacity {
                column_id: column_id.into(),
                current,
                limit,
            },
            other => MoveError::Storage {
                message: other.to_string(),
            },
        }
    }
}

impl From<MoveError> for CardflowError {
    fn from(err: MoveError) -> Self {
        match err {
            MoveError::Validation { message } => CardflowError::Validation(message),
            MoveError::Conflict {
                task_id,
                expected,
                current,
            } => CardflowError::Conflict {
                task_id: task_id.to_string(),
                expected,
                current,
            },
            MoveError::StaleReference { task_id } => CardflowError::Conflict {
                task_id: task_id.to_string(),
                expected: 0,
                current: 0,
            },
            MoveError::Capacity {
                column_id,
                current,
                limit,
            } => CardflowError::Capacity {
                column_id: column_id.to_string(),
                current,
                limit,
            },
            MoveError::Contended { column_id } => {
                CardflowError::Internal(format!("column {} stayed contended through every retry", column_id))
            }
            MoveError::Storage { message } => CardflowError::Storage(message),
        }
    }
}
