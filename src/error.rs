//! Error types for plnr
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (missing task, bad arguments, failed validation)
//! - 3: Conflict (concurrent writer won, caller should retry)
//! - 4: Operation failed (store unavailable, io, serialization)

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the plnr CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const CONFLICT: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for plnr operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Parent task not found: {0}")]
    ParentNotFound(String),

    #[error("Maximum hierarchy depth {max} exceeded under parent {parent}")]
    DepthExceeded { parent: String, max: u8 },

    #[error("Moving {task} under {parent} would create a cycle")]
    CycleDetected { task: String, parent: String },

    #[error("Task {task} does not belong to the sibling group under {group}")]
    InvalidSiblingSet { task: String, group: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Conflicts (exit code 3)
    #[error("Concurrent modification of the task store, retry the operation")]
    StoreConflict,

    // Operation failures (exit code 4)
    #[error("Task store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

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
            Error::NotFound(_)
            | Error::ParentNotFound(_)
            | Error::DepthExceeded { .. }
            | Error::CycleDetected { .. }
            | Error::InvalidSiblingSet { .. }
            | Error::ValidationFailed(_)
            | Error::InvalidConfig(_)
            | Error::InvalidArgument(_) => exit_codes::USER_ERROR,

            // Conflicts
            Error::StoreConflict => exit_codes::CONFLICT,

            // Operation failures
            Error::StoreUnavailable(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::LockFailed(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Stable taxonomy name used in command replies and JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::ParentNotFound(_) => "parent_not_found",
            Error::DepthExceeded { .. } => "depth_exceeded",
            Error::CycleDetected { .. } => "cycle_detected",
            Error::InvalidSiblingSet { .. } => "invalid_sibling_set",
            Error::ValidationFailed(_) => "validation_failed",
            Error::InvalidConfig(_) => "invalid_config",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::StoreConflict => "store_conflict",
            Error::StoreUnavailable(_) => "store_unavailable",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::TomlParse(_) => "toml",
            Error::LockFailed(_) => "lock_failed",
            Error::OperationFailed(_) => "operation_failed",
        }
    }
}

/// Result type alias for plnr operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub kind: &'static str,
    pub code: i32,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            kind: err.kind(),
            code: err.exit_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_user_errors() {
        let err = Error::ValidationFailed("title cannot be empty".to_string());
        assert_eq!(err.exit_code(), exit_codes::USER_ERROR);
        assert_eq!(err.kind(), "validation_failed");
    }

    #[test]
    fn conflict_has_its_own_exit_class() {
        assert_eq!(Error::StoreConflict.exit_code(), exit_codes::CONFLICT);
    }

    #[test]
    fn json_error_carries_kind_and_code() {
        let err = Error::NotFound("task-1".to_string());
        let json = JsonError::from(&err);
        assert_eq!(json.kind, "not_found");
        assert_eq!(json.code, exit_codes::USER_ERROR);
        assert!(json.error.contains("task-1"));
    }
}
