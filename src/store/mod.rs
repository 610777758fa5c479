//! Entity storage drivers.
//!
//! The [`EntityStore`] trait is the single read/write contract for projects,
//! phases, tasks, bugs, design notes and status updates. Soft-delete and archive filtering is expressed once
//! through [`View`] instead of at every call site.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{Bug, DesignNote, Phase, Project, StatusUpdate, Task, TaskStatus};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Query mode: hide archived/deleted records, or return everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum View {
    #[default]
    Active,
    All,
}

impl View {
    pub fn including(include_inactive: bool) -> Self {
        if include_inactive {
            View::All
        } else {
            View::Active
        }
    }

    /// Whether a record with the given archive/delete marker is visible.
    pub fn admits(&self, marker: Option<&DateTime<Utc>>) -> bool {
        match self {
            View::Active => marker.is_none(),
            View::All => true,
        }
    }
}

/// Narrowing filter for task listings.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub project_id: Option<String>,
    pub phase_id: Option<String>,
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    pub fn project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Self::default()
        }
    }

    pub fn phase(phase_id: impl Into<String>) -> Self {
        Self {
            phase_id: Some(phase_id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        if let Some(project_id) = &self.project_id {
            if &task.project_id != project_id {
                return false;
            }
        }
        if let Some(phase_id) = &self.phase_id {
            if task.phase_id.as_ref() != Some(phase_id) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        true
    }
}

/// Narrowing filter for status update listings.
#[derive(Debug, Clone, Default)]
pub struct UpdateFilter {
    pub project_id: Option<String>,
    pub task_id: Option<String>,
}

impl UpdateFilter {
    pub fn matches(&self, update: &StatusUpdate) -> bool {
        if let Some(project_id) = &self.project_id {
            if &update.project_id != project_id {
                return false;
            }
        }
        match &self.task_id {
            Some(task_id) => update.task_id.as_ref() == Some(task_id),
            None => true,
        }
    }
}

/// Storage contract shared by every driver.
///
/// Listings are deterministic: projects, tasks, bugs, notes and status updates
/// by `(created_at, id)`, phases by `(order_index, created_at, id)`. `put_*` is
/// an upsert.
pub trait EntityStore {
    fn get_project(&self, id: &str, view: View) -> Result<Option<Project>>;
    fn list_projects(&self, view: View) -> Result<Vec<Project>>;
    fn list_children(&self, parent_id: &str, view: View) -> Result<Vec<Project>>;
    fn put_project(&mut self, project: &Project) -> Result<()>;

    fn get_phase(&self, id: &str, view: View) -> Result<Option<Phase>>;
    fn list_phases(&self, project_id: &str, view: View) -> Result<Vec<Phase>>;
    /// Write several phases at once; either all land or none do.
    fn put_phases(&mut self, phases: &[Phase]) -> Result<()>;

    fn put_phase(&mut self, phase: &Phase) -> Result<()> {
        self.put_phases(std::slice::from_ref(phase))
    }

    fn get_task(&self, id: &str, view: View) -> Result<Option<Task>>;
    fn list_tasks(&self, filter: &TaskFilter, view: View) -> Result<Vec<Task>>;
    fn put_task(&mut self, task: &Task) -> Result<()>;

    fn get_bug(&self, id: &str, view: View) -> Result<Option<Bug>>;
    fn list_bugs(&self, project_id: Option<&str>, view: View) -> Result<Vec<Bug>>;
    fn put_bug(&mut self, bug: &Bug) -> Result<()>;

    fn get_note(&self, id: &str, view: View) -> Result<Option<DesignNote>>;
    fn list_notes(&self, project_id: Option<&str>, view: View) -> Result<Vec<DesignNote>>;
    fn put_note(&mut self, note: &DesignNote) -> Result<()>;

    fn list_status_updates(&self, filter: &UpdateFilter) -> Result<Vec<StatusUpdate>>;
    fn put_status_update(&mut self, update: &StatusUpdate) -> Result<()>;
}

impl<S: EntityStore + ?Sized> EntityStore for Box<S> {
    fn get_project(&self, id: &str, view: View) -> Result<Option<Project>> {
        (**self).get_project(id, view)
    }

    fn list_projects(&self, view: View) -> Result<Vec<Project>> {
        (**self).list_projects(view)
    }

    fn list_children(&self, parent_id: &str, view: View) -> Result<Vec<Project>> {
        (**self).list_children(parent_id, view)
    }

    fn put_project(&mut self, project: &Project) -> Result<()> {
        (**self).put_project(project)
    }

    fn get_phase(&self, id: &str, view: View) -> Result<Option<Phase>> {
        (**self).get_phase(id, view)
    }

    fn list_phases(&self, project_id: &str, view: View) -> Result<Vec<Phase>> {
        (**self).list_phases(project_id, view)
    }

    fn put_phases(&mut self, phases: &[Phase]) -> Result<()> {
        (**self).put_phases(phases)
    }

    fn get_task(&self, id: &str, view: View) -> Result<Option<Task>> {
        (**self).get_task(id, view)
    }

    fn list_tasks(&self, filter: &TaskFilter, view: View) -> Result<Vec<Task>> {
        (**self).list_tasks(filter, view)
    }

    fn put_task(&mut self, task: &Task) -> Result<()> {
        (**self).put_task(task)
    }

    fn get_bug(&self, id: &str, view: View) -> Result<Option<Bug>> {
        (**self).get_bug(id, view)
    }

    fn list_bugs(&self, project_id: Option<&str>, view: View) -> Result<Vec<Bug>> {
        (**self).list_bugs(project_id, view)
    }

    fn put_bug(&mut self, bug: &Bug) -> Result<()> {
        (**self).put_bug(bug)
    }

    fn get_note(&self, id: &str, view: View) -> Result<Option<DesignNote>> {
        (**self).get_note(id, view)
    }

    fn list_notes(&self, project_id: Option<&str>, view: View) -> Result<Vec<DesignNote>> {
        (**self).list_notes(project_id, view)
    }

    fn put_note(&mut self, note: &DesignNote) -> Result<()> {
        (**self).put_note(note)
    }

    fn list_status_updates(&self, filter: &UpdateFilter) -> Result<Vec<StatusUpdate>> {
        (**self).list_status_updates(filter)
    }

    fn put_status_update(&mut self, update: &StatusUpdate) -> Result<()> {
        (**self).put_status_update(update)
    }
}

/// Sort phases into listing order.
pub(crate) fn sort_phases(phases: &mut [Phase]) {
    phases.sort_by(|left, right| {
        left.order_index
            .cmp(&right.order_index)
            .then_with(|| left.created_at.cmp(&right.created_at))
            .then_with(|| left.id.cmp(&right.id))
    });
}
