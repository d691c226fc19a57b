//! Error types for tasknote
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, unknown task, invalid config or condition)
//! - 3: Refused by chain integrity (broken continuity, live follower)
//! - 4: Operation failed (backend, IO, serialization)

use std::path::PathBuf;
use thiserror::Error;

use crate::expression::ExpressionError;

/// Exit codes for the tasknote CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const INTEGRITY_REFUSED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for tasknote operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Note not found: {0}")]
    NoteNotFound(String),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    // Integrity refusals (exit code 3)
    #[error("Chain integrity violation: {0}")]
    ChainIntegrity(String),

    // Operation failures (exit code 4)
    #[error("Record already exists: {0}")]
    DuplicateRecord(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // User errors
            Error::InvalidConfig(_)
            | Error::InvalidArgument(_)
            | Error::TaskNotFound(_)
            | Error::NoteNotFound(_)
            | Error::Expression(_) => exit_codes::USER_ERROR,

            // Integrity refusals
            Error::ChainIntegrity(_) => exit_codes::INTEGRITY_REFUSED,

            // Operation failures
            Error::DuplicateRecord(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Structured details for JSON error output, when the error carries any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::LockFailed(path) => Some(serde_json::json!({ "path": path })),
            Error::Expression(ExpressionError::Parse { position, .. }) => {
                Some(serde_json::json!({ "position": position }))
            }
            Error::Expression(ExpressionError::UnboundVariable(name)) => {
                Some(serde_json::json!({ "variable": name }))
            }
            _ => None,
        }
    }
}

/// Result type alias for tasknote operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            details: err.details(),
        }
    }
}

/// Failure of a single reconciliation in the watcher loop.
///
/// These are logged and the task is skipped; they never stop polling.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("note {version} of task {task_id} has no predecessor {previous}")]
    MissingPredecessor {
        task_id: String,
        version: String,
        previous: String,
    },

    #[error("note {version} of task {task_id} is not the first note but has no previous")]
    DetachedNote { task_id: String, version: String },

    #[error("update of task {task_id} failed: {source}")]
    UpdateFailed {
        task_id: String,
        #[source]
        source: Error,
    },

    #[error(transparent)]
    Backend(#[from] Error),
}
