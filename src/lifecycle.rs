//! Task and bug state machine with optimistic concurrency.
//!
//! Tasks move `todo -> in_progress -> done`; `blocked` is reachable from any
//! state except `done`. Every accepted mutation bumps `version` by exactly one,
//! and callers must present the version they last read.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::model::{Bug, BugUpdate, RationaleEntry, Task, TaskStatus};

/// Whether `from -> to` is an allowed task transition.
pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
    match (from, to) {
        (TaskStatus::Todo, TaskStatus::InProgress) => true,
        (TaskStatus::InProgress, TaskStatus::Done) => true,
        (TaskStatus::Done, TaskStatus::Blocked) => false,
        (_, TaskStatus::Blocked) => true,
        _ => false,
    }
}

/// Reject a stale optimistic-concurrency token.
pub fn check_version(expected: u32, current: u32) -> Result<()> {
    if expected != current {
        return Err(Error::VersionConflict { expected, current });
    }
    Ok(())
}

/// A requested status change.
#[derive(Debug, Clone)]
pub struct Transition<'a> {
    pub to: TaskStatus,
    pub actor: &'a str,
    pub rationale: &'a str,
    pub expected_version: u32,
    pub confidence: Option<f64>,
}

/// Apply a transition to `task` in place.
///
/// The version is checked before legality. On rejection the task is left
/// untouched.
pub fn apply_transition(task: &mut Task, request: &Transition<'_>, now: DateTime<Utc>) -> Result<()> {
    check_version(request.expected_version, task.version)?;
    if !can_transition(task.status, request.to) {
        return Err(Error::InvalidTransition {
            from: task.status,
            to: request.to,
        });
    }
    if let Some(confidence) = request.confidence {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(Error::InvalidArgument(format!(
                "confidence must be between 0 and 1, got {confidence}"
            )));
        }
    }

    task.status = request.to;
    task.rationale_log.push(RationaleEntry {
        at: now,
        actor: request.actor.to_string(),
        status: request.to,
        rationale: request.rationale.to_string(),
        confidence: request.confidence,
    });
    if request.to == TaskStatus::InProgress && !task.assignees.iter().any(|a| a == request.actor) {
        task.assignees.push(request.actor.to_string());
    }
    touch_task(task, now);
    Ok(())
}

/// Record an accepted task mutation.
pub fn touch_task(task: &mut Task, now: DateTime<Utc>) {
    task.version += 1;
    task.updated_at = now;
}

/// Apply a partial bug update after checking the version.
///
/// Bugs have no enforced transition graph. An empty update is still an
/// accepted mutation and bumps the version.
pub fn apply_bug_update(
    bug: &mut Bug,
    update: BugUpdate,
    expected_version: u32,
    now: DateTime<Utc>,
) -> Result<()> {
    check_version(expected_version, bug.version)?;
    if let Some(title) = update.title {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::InvalidArgument("bug title cannot be empty".to_string()));
        }
        bug.title = title.to_string();
    }
    if let Some(severity) = update.severity {
        bug.severity = severity;
    }
    if let Some(status) = update.status {
        bug.status = status;
    }
    if let Some(linked) = update.linked_task_ids {
        bug.linked_task_ids = linked;
    }
    if let Some(steps) = update.repro_steps {
        bug.repro_steps = steps;
    }
    if let Some(fix) = update.proposed_fix {
        bug.proposed_fix = Some(fix);
    }
    touch_bug(bug, now);
    Ok(())
}

pub fn touch_bug(bug: &mut Bug, now: DateTime<Utc>) {
    bug.version += 1;
    bug.updated_at = now;
}
