//! Error types for trellis
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, missing entity, missing store)
//! - 3: Rejected by an invariant (state machine, stale version, cycle, phase mismatch)
//! - 4: Operation failed (io, database, serialization)

use std::path::PathBuf;
use thiserror::Error;

use crate::model::TaskStatus;

/// Exit codes for the trellis CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const REJECTED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for trellis operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("trellis is not initialized in {0}")]
    NotInitialized(PathBuf),

    // Invariant rejections (exit code 3)
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Version conflict: expected {expected}, current is {current}")]
    VersionConflict { expected: u32, current: u32 },

    #[error("Project cannot be its own parent: {0}")]
    CycleSelf(String),

    #[error("Setting parent of {id} to {parent} would create a cycle")]
    CycleDetected { id: String, parent: String },

    #[error("Phase {phase} belongs to project {phase_project}, task belongs to {task_project}")]
    PhaseProjectMismatch {
        phase: String,
        phase_project: String,
        task_project: String,
    },

    #[error("Root project cannot be archived: {0}")]
    RootProject(String),

    // Operation failures (exit code 4)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::NotFound { .. }
            | Error::InvalidArgument(_)
            | Error::InvalidConfig(_)
            | Error::NotInitialized(_) => exit_codes::USER_ERROR,

            Error::InvalidTransition { .. }
            | Error::VersionConflict { .. }
            | Error::CycleSelf(_)
            | Error::CycleDetected { .. }
            | Error::PhaseProjectMismatch { .. }
            | Error::RootProject(_) => exit_codes::REJECTED,

            Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::Sqlite(_)
            | Error::LockFailed(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Stable tag callers can branch on
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::InvalidConfig(_) => "invalid_config",
            Error::NotInitialized(_) => "not_initialized",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::VersionConflict { .. } => "version_conflict",
            Error::CycleSelf(_) => "cycle_self",
            Error::CycleDetected { .. } => "cycle_detected",
            Error::PhaseProjectMismatch { .. } => "phase_project_mismatch",
            Error::RootProject(_) => "root_project",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::TomlParse(_) | Error::TomlSerialize(_) => "toml",
            Error::Sqlite(_) => "database",
            Error::LockFailed(_) => "lock_failed",
            Error::OperationFailed(_) => "operation_failed",
        }
    }

    /// Structured details for machine consumers
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::VersionConflict { expected, current } => Some(serde_json::json!({
                "expected_version": expected,
                "current_version": current,
            })),
            Error::InvalidTransition { from, to } => Some(serde_json::json!({
                "from": from,
                "to": to,
            })),
            Error::NotFound { entity, id } => Some(serde_json::json!({
                "entity": entity,
                "id": id,
            })),
            _ => None,
        }
    }
}

/// Result type alias for trellis operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            kind: err.kind(),
            details: err.details(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_conflict_carries_current_version() {
        let err = Error::VersionConflict {
            expected: 1,
            current: 3,
        };
        assert_eq!(err.exit_code(), exit_codes::REJECTED);
        assert_eq!(err.kind(), "version_conflict");
        let details = err.details().expect("details");
        assert_eq!(details["current_version"].as_u64(), Some(3));
    }

    #[test]
    fn not_found_is_user_error() {
        let err = Error::not_found("task", "t-abc");
        assert_eq!(err.exit_code(), exit_codes::USER_ERROR);
        assert_eq!(err.to_string(), "task not found: t-abc");
    }
}
