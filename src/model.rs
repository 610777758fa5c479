//! Records tracked by trellis: projects, phases, tasks, bugs, design notes
//! and status updates.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};

pub const PROJECT_ID_PREFIX: &str = "prj";
pub const PHASE_ID_PREFIX: &str = "ph";
pub const TASK_ID_PREFIX: &str = "t";
pub const BUG_ID_PREFIX: &str = "b";
pub const NOTE_ID_PREFIX: &str = "dn";
pub const UPDATE_ID_PREFIX: &str = "su";

/// Generate a prefixed id with a lowercase ULID suffix.
pub fn new_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Ulid::new().to_string().to_lowercase())
}

// =============================================================================
// Statuses
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Blocked => "blocked",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, TaskStatus::Done)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "todo" | "open" => Ok(TaskStatus::Todo),
            "in_progress" => Ok(TaskStatus::InProgress),
            "done" | "completed" => Ok(TaskStatus::Done),
            "blocked" => Ok(TaskStatus::Blocked),
            other => Err(Error::InvalidArgument(format!(
                "unknown task status '{other}' (expected todo, in_progress, done, blocked)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BugStatus {
    Open,
    Triaged,
    InProgress,
    Resolved,
    Closed,
}

impl BugStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BugStatus::Open => "open",
            BugStatus::Triaged => "triaged",
            BugStatus::InProgress => "in_progress",
            BugStatus::Resolved => "resolved",
            BugStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for BugStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BugStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "open" => Ok(BugStatus::Open),
            "triaged" => Ok(BugStatus::Triaged),
            "in_progress" => Ok(BugStatus::InProgress),
            "resolved" => Ok(BugStatus::Resolved),
            "closed" => Ok(BugStatus::Closed),
            other => Err(Error::InvalidArgument(format!(
                "unknown bug status '{other}' (expected open, triaged, in_progress, resolved, closed)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(Error::InvalidArgument(format!(
                "unknown severity '{other}' (expected low, medium, high, critical)"
            ))),
        }
    }
}

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

impl Project {
    pub fn new(id: impl Into<String>, name: impl Into<String>, parent_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            parent_id,
            created_at: Utc::now(),
            archived_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.archived_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Phase {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub order_index: i64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

impl Phase {
    pub fn is_active(&self) -> bool {
        self.archived_at.is_none()
    }
}

/// One entry in a task's append-only rationale log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RationaleEntry {
    pub at: DateTime<Utc>,
    pub actor: String,
    pub status: TaskStatus,
    pub rationale: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    pub title: String,
    pub status: TaskStatus,
    pub version: u32,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(default)]
    pub rationale_log: Vec<RationaleEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(project_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(TASK_ID_PREFIX),
            project_id: project_id.into(),
            phase_id: None,
            priority: None,
            title: title.into(),
            status: TaskStatus::Todo,
            version: 1,
            assignees: Vec::new(),
            rationale_log: Vec::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bug {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub severity: Severity,
    pub status: BugStatus,
    #[serde(default)]
    pub linked_task_ids: Vec<String>,
    #[serde(default)]
    pub repro_steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposed_fix: Option<String>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Bug {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Input for bug creation.
#[derive(Debug, Clone, Default)]
pub struct NewBug {
    pub title: String,
    pub severity: Option<Severity>,
    pub linked_task_ids: Vec<String>,
    pub repro_steps: Vec<String>,
    pub proposed_fix: Option<String>,
}

/// Partial update for a bug; `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct BugUpdate {
    pub title: Option<String>,
    pub severity: Option<Severity>,
    pub status: Option<BugStatus>,
    pub linked_task_ids: Option<Vec<String>>,
    pub repro_steps: Option<Vec<String>>,
    pub proposed_fix: Option<String>,
}

impl BugUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.severity.is_none()
            && self.status.is_none()
            && self.linked_task_ids.is_none()
            && self.repro_steps.is_none()
            && self.proposed_fix.is_none()
    }
}

/// Architecture decision record scoped to a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DesignNote {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub context: String,
    pub decision: String,
    pub consequences: String,
    /// Note that replaces this one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    pub actor: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DesignNote {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Input for design note creation.
#[derive(Debug, Clone, Default)]
pub struct NewDesignNote {
    pub title: String,
    pub context: String,
    pub decision: String,
    pub consequences: String,
}

/// Free-form progress message, optionally about one task. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusUpdate {
    pub id: String,
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub actor: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_accepts_legacy_aliases() {
        assert_eq!("open".parse::<TaskStatus>().expect("open"), TaskStatus::Todo);
        assert_eq!(
            "completed".parse::<TaskStatus>().expect("completed"),
            TaskStatus::Done
        );
        assert_eq!(
            "in-progress".parse::<TaskStatus>().expect("in-progress"),
            TaskStatus::InProgress
        );
        assert!("finished".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn task_status_serializes_snake_case() {
        let value = serde_json::to_value(TaskStatus::InProgress).expect("serialize");
        assert_eq!(value, serde_json::json!("in_progress"));
    }

    #[test]
    fn new_task_starts_at_version_one() {
        let task = Task::new("prj-1", "write docs");
        assert_eq!(task.version, 1);
        assert_eq!(task.status, TaskStatus::Todo);
        assert!(task.id.starts_with("t-"));
        assert!(task.phase_id.is_none() && task.priority.is_none());
    }

    #[test]
    fn new_id_is_lowercase() {
        let id = new_id(PHASE_ID_PREFIX);
        assert!(id.starts_with("ph-"));
        assert_eq!(id, id.to_lowercase());
    }
}
