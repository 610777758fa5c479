//! Map-backed storage driver.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::model::{Bug, DesignNote, Phase, Project, StatusUpdate, Task};

use super::{sort_phases, EntityStore, TaskFilter, UpdateFilter, View};

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    projects: BTreeMap<String, Project>,
    phases: BTreeMap<String, Phase>,
    tasks: BTreeMap<String, Task>,
    bugs: BTreeMap<String, Bug>,
    notes: BTreeMap<String, DesignNote>,
    updates: BTreeMap<String, StatusUpdate>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn by_creation<T>(items: &mut [T], key: impl Fn(&T) -> (chrono::DateTime<chrono::Utc>, &str)) {
    items.sort_by(|left, right| key(left).cmp(&key(right)));
}

impl EntityStore for MemoryStore {
    fn get_project(&self, id: &str, view: View) -> Result<Option<Project>> {
        Ok(self
            .projects
            .get(id)
            .filter(|project| view.admits(project.archived_at.as_ref()))
            .cloned())
    }

    fn list_projects(&self, view: View) -> Result<Vec<Project>> {
        let mut projects: Vec<Project> = self
            .projects
            .values()
            .filter(|project| view.admits(project.archived_at.as_ref()))
            .cloned()
            .collect();
        by_creation(&mut projects, |p| (p.created_at, p.id.as_str()));
        Ok(projects)
    }

    fn list_children(&self, parent_id: &str, view: View) -> Result<Vec<Project>> {
        let mut children: Vec<Project> = self
            .projects
            .values()
            .filter(|project| project.parent_id.as_deref() == Some(parent_id))
            .filter(|project| view.admits(project.archived_at.as_ref()))
            .cloned()
            .collect();
        by_creation(&mut children, |p| (p.created_at, p.id.as_str()));
        Ok(children)
    }

    fn put_project(&mut self, project: &Project) -> Result<()> {
        self.projects.insert(project.id.clone(), project.clone());
        Ok(())
    }

    fn get_phase(&self, id: &str, view: View) -> Result<Option<Phase>> {
        Ok(self
            .phases
            .get(id)
            .filter(|phase| view.admits(phase.archived_at.as_ref()))
            .cloned())
    }

    fn list_phases(&self, project_id: &str, view: View) -> Result<Vec<Phase>> {
        let mut phases: Vec<Phase> = self
            .phases
            .values()
            .filter(|phase| phase.project_id == project_id)
            .filter(|phase| view.admits(phase.archived_at.as_ref()))
            .cloned()
            .collect();
        sort_phases(&mut phases);
        Ok(phases)
    }

    fn put_phases(&mut self, phases: &[Phase]) -> Result<()> {
        for phase in phases {
            self.phases.insert(phase.id.clone(), phase.clone());
        }
        Ok(())
    }

    fn get_task(&self, id: &str, view: View) -> Result<Option<Task>> {
        Ok(self
            .tasks
            .get(id)
            .filter(|task| view.admits(task.deleted_at.as_ref()))
            .cloned())
    }

    fn list_tasks(&self, filter: &TaskFilter, view: View) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .values()
            .filter(|task| view.admits(task.deleted_at.as_ref()))
            .filter(|task| filter.matches(task))
            .cloned()
            .collect();
        by_creation(&mut tasks, |t| (t.created_at, t.id.as_str()));
        Ok(tasks)
    }

    fn put_task(&mut self, task: &Task) -> Result<()> {
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn get_bug(&self, id: &str, view: View) -> Result<Option<Bug>> {
        Ok(self
            .bugs
            .get(id)
            .filter(|bug| view.admits(bug.deleted_at.as_ref()))
            .cloned())
    }

    fn list_bugs(&self, project_id: Option<&str>, view: View) -> Result<Vec<Bug>> {
        let mut bugs: Vec<Bug> = self
            .bugs
            .values()
            .filter(|bug| project_id.map_or(true, |id| bug.project_id == id))
            .filter(|bug| view.admits(bug.deleted_at.as_ref()))
            .cloned()
            .collect();
        by_creation(&mut bugs, |b| (b.created_at, b.id.as_str()));
        Ok(bugs)
    }

    fn put_bug(&mut self, bug: &Bug) -> Result<()> {
        self.bugs.insert(bug.id.clone(), bug.clone());
        Ok(())
    }

    fn get_note(&self, id: &str, view: View) -> Result<Option<DesignNote>> {
        Ok(self
            .notes
            .get(id)
            .filter(|note| view.admits(note.deleted_at.as_ref()))
            .cloned())
    }

    fn list_notes(&self, project_id: Option<&str>, view: View) -> Result<Vec<DesignNote>> {
        let mut notes: Vec<DesignNote> = self
            .notes
            .values()
            .filter(|note| project_id.map_or(true, |id| note.project_id == id))
            .filter(|note| view.admits(note.deleted_at.as_ref()))
            .cloned()
            .collect();
        by_creation(&mut notes, |n| (n.created_at, n.id.as_str()));
        Ok(notes)
    }

    fn put_note(&mut self, note: &DesignNote) -> Result<()> {
        self.notes.insert(note.id.clone(), note.clone());
        Ok(())
    }

    fn list_status_updates(&self, filter: &UpdateFilter) -> Result<Vec<StatusUpdate>> {
        let mut updates: Vec<StatusUpdate> = self
            .updates
            .values()
            .filter(|update| filter.matches(update))
            .cloned()
            .collect();
        by_creation(&mut updates, |u| (u.created_at, u.id.as_str()));
        Ok(updates)
    }

    fn put_status_update(&mut self, update: &StatusUpdate) -> Result<()> {
        self.updates.insert(update.id.clone(), update.clone());
        Ok(())
    }
}
