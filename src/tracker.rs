//! The tracker: every operation on projects, phases, tasks, bugs, design notes
//! and status updates.
//!
//! A [`Tracker`] owns an [`EntityStore`], the aggregated-status cache and the
//! audit/change sinks. Mutations go through the store and the relevant
//! manager, then invalidate the cached roll-ups of the owning project and its
//! ancestors. Sink failures are logged and never undo an accepted mutation.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audit::{self, AuditEntry, AuditLog, AuditSink};
use crate::cache::{CacheStats, StatusCache, DEFAULT_TTL};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{ChangeSink, Event, EventKind};
use crate::hierarchy;
use crate::lifecycle::{self, Transition};
use crate::model::{
    new_id, Bug, BugStatus, BugUpdate, DesignNote, NewBug, NewDesignNote, Phase, Project,
    Severity, StatusUpdate, Task, TaskStatus, BUG_ID_PREFIX, NOTE_ID_PREFIX, PROJECT_ID_PREFIX,
    UPDATE_ID_PREFIX,
};
use crate::phase;
use crate::priority;
use crate::status::{self, AggregatedStatus, ProjectStatus};
use crate::store::{EntityStore, TaskFilter, UpdateFilter, View};

/// Listing window for notes and status updates when no limit is given.
pub const DEFAULT_LIST_LIMIT: usize = 50;
/// Largest listing window a caller may ask for.
pub const MAX_LIST_LIMIT: usize = 200;

/// Tunables for a tracker, usually derived from [`Config`].
#[derive(Debug, Clone)]
pub struct TrackerOptions {
    pub root_id: String,
    pub root_name: String,
    pub default_phase_name: String,
    pub cache_ttl: Duration,
    pub audit_max_entries: usize,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            root_id: "default".to_string(),
            root_name: "Default Project".to_string(),
            default_phase_name: "Default Phase".to_string(),
            cache_ttl: DEFAULT_TTL,
            audit_max_entries: audit::DEFAULT_MAX_ENTRIES,
        }
    }
}

impl TrackerOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            root_id: config.root.id.trim().to_string(),
            root_name: config.root.name.clone(),
            default_phase_name: config.phases.default_name.clone(),
            cache_ttl: config.status.ttl()?,
            audit_max_entries: config.audit.max_entries,
        })
    }
}

/// Input for project creation.
#[derive(Debug, Clone, Default)]
pub struct NewProject {
    /// Explicit id; generated when absent.
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<String>,
}

/// Options for task listings.
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub project_id: Option<String>,
    pub phase_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub include_deleted: bool,
    /// Sort by next-action order instead of creation order.
    pub ordered: bool,
}

/// What a backfill touched.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct BackfillReport {
    pub tasks: Vec<String>,
    pub phases_created: Vec<String>,
}

pub struct Tracker<S: EntityStore> {
    store: S,
    cache: StatusCache,
    audit: Box<dyn AuditSink>,
    changes: Option<Box<dyn ChangeSink>>,
    options: TrackerOptions,
}

impl<S: EntityStore> Tracker<S> {
    pub fn new(store: S) -> Result<Self> {
        Self::with_options(store, TrackerOptions::default())
    }

    /// Build a tracker and seed the root project if it is missing.
    pub fn with_options(mut store: S, options: TrackerOptions) -> Result<Self> {
        if store.get_project(&options.root_id, View::All)?.is_none() {
            let root = Project::new(options.root_id.clone(), options.root_name.clone(), None);
            store.put_project(&root)?;
            info!(project = %root.id, "seeded root project");
        }
        Ok(Self {
            store,
            cache: StatusCache::new(options.cache_ttl),
            audit: Box::new(AuditLog::new(options.audit_max_entries)),
            changes: None,
            options,
        })
    }

    pub fn with_audit_sink(mut self, sink: Box<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    pub fn with_change_sink(mut self, sink: Box<dyn ChangeSink>) -> Self {
        self.changes = Some(sink);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Direct store access; writes made here bypass cache invalidation.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn options(&self) -> &TrackerOptions {
        &self.options
    }

    pub fn root_id(&self) -> &str {
        &self.options.root_id
    }

    // =========================================================================
    // Projects
    // =========================================================================

    pub fn create_project(&mut self, actor: &str, name: &str, parent_id: Option<&str>) -> Result<Project> {
        self.create_project_with(
            actor,
            NewProject {
                name: name.to_string(),
                parent_id: parent_id.map(str::to_string),
                ..NewProject::default()
            },
        )
    }

    pub fn create_project_with(&mut self, actor: &str, input: NewProject) -> Result<Project> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(Error::InvalidArgument("project name cannot be empty".to_string()));
        }
        let id = match input.id.as_deref().map(str::trim) {
            Some("") => {
                return Err(Error::InvalidArgument("project id cannot be empty".to_string()));
            }
            Some(id) => id.to_string(),
            None => new_id(PROJECT_ID_PREFIX),
        };
        if self.store.get_project(&id, View::All)?.is_some() {
            return Err(Error::InvalidArgument(format!("project already exists: {id}")));
        }
        hierarchy::check_parent(&self.store, &id, input.parent_id.as_deref())?;

        let mut project = Project::new(id, name, input.parent_id.clone());
        project.description = input.description.filter(|d| !d.trim().is_empty());
        self.store.put_project(&project)?;
        self.invalidate(&project.id)?;
        info!(project = %project.id, actor, "project created");
        self.record_change(actor, "project", &project.id, Some(&project.id), "created", None, Some(&project));
        self.broadcast(actor, EventKind::ProjectCreated, &project);
        Ok(project)
    }

    /// Fetch a project, archived or not.
    pub fn get_project(&self, id: &str) -> Result<Project> {
        self.store
            .get_project(id, View::All)?
            .ok_or_else(|| Error::not_found("project", id))
    }

    pub fn list_projects(&self, include_archived: bool) -> Result<Vec<Project>> {
        self.store.list_projects(View::including(include_archived))
    }

    /// Direct, active children of a project.
    pub fn list_children(&self, id: &str) -> Result<Vec<Project>> {
        self.get_project(id)?;
        hierarchy::children(&self.store, id, View::Active)
    }

    pub fn set_project_parent(&mut self, actor: &str, id: &str, parent_id: Option<&str>) -> Result<Project> {
        if self.store.get_project(id, View::All)?.is_none() {
            return Err(Error::not_found("project", id));
        }
        // The old chain loses this subtree, the new chain gains it.
        self.invalidate(id)?;
        let (before, after) = hierarchy::set_parent(&mut self.store, id, parent_id)?;
        if before == after {
            return Ok(after);
        }
        self.invalidate(id)?;
        info!(project = id, parent = ?parent_id, actor, "project parent updated");
        self.record_change(actor, "project", id, Some(id), "reparented", Some(&before), Some(&after));
        self.broadcast(actor, EventKind::ProjectUpdated, &after);
        Ok(after)
    }

    pub fn archive_project(&mut self, actor: &str, id: &str) -> Result<Project> {
        if id == self.options.root_id {
            return Err(Error::RootProject(id.to_string()));
        }
        self.set_project_archived(actor, id, true)
    }

    pub fn restore_project(&mut self, actor: &str, id: &str) -> Result<Project> {
        self.set_project_archived(actor, id, false)
    }

    fn set_project_archived(&mut self, actor: &str, id: &str, archived: bool) -> Result<Project> {
        let before = self.get_project(id)?;
        if before.archived_at.is_some() == archived {
            return Ok(before);
        }
        let mut after = before.clone();
        after.archived_at = if archived { Some(Utc::now()) } else { None };
        self.store.put_project(&after)?;
        self.invalidate(id)?;

        let (action, kind) = if archived {
            ("archived", EventKind::ProjectArchived)
        } else {
            ("restored", EventKind::ProjectRestored)
        };
        info!(project = id, actor, action, "project archive state changed");
        self.record_change(actor, "project", id, Some(id), action, Some(&before), Some(&after));
        self.broadcast(actor, kind, &after);
        Ok(after)
    }

    // =========================================================================
    // Phases
    // =========================================================================

    pub fn create_phase(&mut self, actor: &str, project_id: &str, name: &str) -> Result<Phase> {
        self.require_active_project(project_id)?;
        let phase = phase::create(&mut self.store, project_id, name)?;
        self.phase_created(actor, &phase)?;
        Ok(phase)
    }

    fn phase_created(&mut self, actor: &str, phase: &Phase) -> Result<()> {
        self.invalidate(&phase.project_id)?;
        info!(phase = %phase.id, project = %phase.project_id, actor, "phase created");
        self.record_change(actor, "phase", &phase.id, Some(&phase.project_id), "created", None, Some(phase));
        self.broadcast(actor, EventKind::PhaseCreated, phase);
        Ok(())
    }

    pub fn list_phases(&self, project_id: &str, include_archived: bool) -> Result<Vec<Phase>> {
        self.get_project(project_id)?;
        self.store
            .list_phases(project_id, View::including(include_archived))
    }

    /// Apply `(phase id, index)` requests and renumber the affected projects.
    ///
    /// Unknown ids are ignored. Returns the affected project ids.
    pub fn reorder_phases(&mut self, actor: &str, requests: &[(String, i64)]) -> Result<Vec<String>> {
        let outcome = phase::reorder(&mut self.store, requests)?;
        for project_id in &outcome.projects {
            self.invalidate(project_id)?;
        }
        for change in &outcome.changes {
            let mut diff = audit::Diff::new();
            diff.insert(
                "order_index".to_string(),
                audit::FieldChange {
                    from: change.from.into(),
                    to: change.to.into(),
                },
            );
            self.record(AuditEntry::new(
                actor,
                "phase",
                &change.phase_id,
                Some(&change.project_id),
                "reordered",
                diff,
            ));
        }
        for project_id in &outcome.projects {
            let phases = self.store.list_phases(project_id, View::All)?;
            self.broadcast(
                actor,
                EventKind::PhaseReordered,
                &serde_json::json!({ "project_id": project_id, "phases": phases }),
            );
        }
        info!(projects = outcome.projects.len(), moved = outcome.changes.len(), actor, "phases reordered");
        Ok(outcome.projects)
    }

    pub fn archive_phase(&mut self, actor: &str, id: &str) -> Result<Phase> {
        self.set_phase_archived(actor, id, true)
    }

    pub fn restore_phase(&mut self, actor: &str, id: &str) -> Result<Phase> {
        self.set_phase_archived(actor, id, false)
    }

    fn set_phase_archived(&mut self, actor: &str, id: &str, archived: bool) -> Result<Phase> {
        let before = self
            .store
            .get_phase(id, View::All)?
            .ok_or_else(|| Error::not_found("phase", id))?;
        let (after, changed) = phase::set_archived(&mut self.store, id, archived)?;
        if !changed {
            return Ok(after);
        }
        self.invalidate(&after.project_id)?;
        let (action, kind) = if archived {
            ("archived", EventKind::PhaseArchived)
        } else {
            ("restored", EventKind::PhaseRestored)
        };
        info!(phase = id, actor, action, "phase archive state changed");
        self.record_change(actor, "phase", id, Some(&after.project_id), action, Some(&before), Some(&after));
        self.broadcast(actor, kind, &after);
        Ok(after)
    }

    /// Create the default phase if the project has none at all.
    pub fn ensure_default_phase(&mut self, actor: &str, project_id: &str) -> Result<Option<Phase>> {
        self.require_active_project(project_id)?;
        let created = phase::ensure_default(
            &mut self.store,
            project_id,
            &self.options.default_phase_name,
        )?;
        if let Some(phase) = &created {
            self.phase_created(actor, phase)?;
        }
        Ok(created)
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    /// Create a task; without a phase it lands in the project's first phase.
    pub fn create_task(
        &mut self,
        actor: &str,
        project_id: &str,
        title: &str,
        phase_id: Option<&str>,
    ) -> Result<Task> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::InvalidArgument("task title cannot be empty".to_string()));
        }
        self.require_active_project(project_id)?;

        let target = match phase_id {
            Some(phase_id) => Some(self.require_phase_for(project_id, phase_id)?),
            None => {
                self.ensure_default_phase(actor, project_id)?;
                phase::first_active(&self.store, project_id)?
            }
        };

        let mut task = Task::new(project_id, title);
        if let Some(phase) = target {
            task.priority = Some(priority::next_in_phase(&self.store, &phase.id, None)?);
            task.phase_id = Some(phase.id);
        }
        self.store.put_task(&task)?;
        self.invalidate(project_id)?;
        info!(task = %task.id, project = project_id, phase = ?task.phase_id, actor, "task created");
        self.record_change(actor, "task", &task.id, Some(project_id), "created", None, Some(&task));
        self.broadcast(actor, EventKind::TaskCreated, &task);
        Ok(task)
    }

    /// Fetch a task, deleted or not.
    pub fn get_task(&self, id: &str) -> Result<Task> {
        self.store
            .get_task(id, View::All)?
            .ok_or_else(|| Error::not_found("task", id))
    }

    pub fn list_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>> {
        if let Some(project_id) = &query.project_id {
            self.get_project(project_id)?;
        }
        let filter = TaskFilter {
            project_id: query.project_id.clone(),
            phase_id: query.phase_id.clone(),
            status: query.status,
        };
        let mut tasks = self
            .store
            .list_tasks(&filter, View::including(query.include_deleted))?;
        if query.ordered {
            let projects: BTreeSet<&str> = tasks.iter().map(|t| t.project_id.as_str()).collect();
            let mut index: HashMap<String, i64> = HashMap::new();
            for project_id in projects {
                index.extend(status::phase_index(
                    &self.store.list_phases(project_id, View::Active)?,
                ));
            }
            tasks.sort_by(|left, right| status::next_action_cmp(left, right, &index));
        }
        Ok(tasks)
    }

    /// Move a task into a phase of the same project.
    ///
    /// Without an explicit priority the task goes to the end of the
    /// destination phase.
    pub fn move_task(
        &mut self,
        actor: &str,
        id: &str,
        phase_id: &str,
        priority: Option<i64>,
    ) -> Result<Task> {
        let before = self.require_active_task(id)?;
        let target = self.require_phase_for(&before.project_id, phase_id)?;
        let priority = match priority {
            Some(value) => value,
            None => priority::next_in_phase(&self.store, &target.id, Some(id))?,
        };

        let mut task = before.clone();
        task.phase_id = Some(target.id);
        task.priority = Some(priority);
        lifecycle::touch_task(&mut task, Utc::now());
        self.store.put_task(&task)?;
        self.invalidate(&task.project_id)?;
        info!(task = id, phase = phase_id, priority, actor, "task moved");
        self.record_change(actor, "task", id, Some(&task.project_id), "moved", Some(&before), Some(&task));
        self.broadcast(actor, EventKind::TaskMoved, &task);
        Ok(task)
    }

    /// Change a task's status under the state machine and version guard.
    pub fn transition_task(
        &mut self,
        actor: &str,
        id: &str,
        to: TaskStatus,
        rationale: &str,
        expected_version: u32,
        confidence: Option<f64>,
    ) -> Result<Task> {
        let before = self.require_active_task(id)?;
        let mut task = before.clone();
        lifecycle::apply_transition(
            &mut task,
            &Transition {
                to,
                actor,
                rationale,
                expected_version,
                confidence,
            },
            Utc::now(),
        )?;
        self.store.put_task(&task)?;
        self.invalidate(&task.project_id)?;
        info!(task = id, from = %before.status, to = %task.status, version = task.version, actor, "task transitioned");
        self.record_change(actor, "task", id, Some(&task.project_id), "transitioned", Some(&before), Some(&task));
        self.broadcast(actor, EventKind::TaskUpdated, &task);
        Ok(task)
    }

    /// Soft-delete a task. Returns whether anything changed.
    pub fn delete_task(&mut self, actor: &str, id: &str) -> Result<(Task, bool)> {
        self.set_task_deleted(actor, id, true)
    }

    pub fn restore_task(&mut self, actor: &str, id: &str) -> Result<(Task, bool)> {
        self.set_task_deleted(actor, id, false)
    }

    fn set_task_deleted(&mut self, actor: &str, id: &str, deleted: bool) -> Result<(Task, bool)> {
        let before = self.get_task(id)?;
        if before.deleted_at.is_some() == deleted {
            return Ok((before, false));
        }
        let now = Utc::now();
        let mut task = before.clone();
        task.deleted_at = if deleted { Some(now) } else { None };
        lifecycle::touch_task(&mut task, now);
        self.store.put_task(&task)?;
        self.invalidate(&task.project_id)?;

        let (action, kind) = if deleted {
            ("deleted", EventKind::TaskDeleted)
        } else {
            ("restored", EventKind::TaskRestored)
        };
        info!(task = id, actor, action, "task delete state changed");
        self.record_change(actor, "task", id, Some(&task.project_id), action, Some(&before), Some(&task));
        self.broadcast(actor, kind, &task);
        Ok((task, true))
    }

    /// Attach every active unphased task to its project's first phase.
    pub fn backfill_phases(&mut self, actor: &str) -> Result<BackfillReport> {
        let mut report = BackfillReport::default();
        for project in self.store.list_projects(View::Active)? {
            let unphased: Vec<Task> = self
                .store
                .list_tasks(&TaskFilter::project(&project.id), View::Active)?
                .into_iter()
                .filter(|task| task.phase_id.is_none())
                .collect();
            if unphased.is_empty() {
                continue;
            }
            if let Some(created) = self.ensure_default_phase(actor, &project.id)? {
                report.phases_created.push(created.id);
            }
            let Some(target) = phase::first_active(&self.store, &project.id)? else {
                debug!(project = %project.id, "no active phase to backfill into");
                continue;
            };

            let mut next = priority::next_in_phase(&self.store, &target.id, None)?;
            for before in unphased {
                let mut task = before.clone();
                task.phase_id = Some(target.id.clone());
                task.priority = Some(next);
                next += 1;
                lifecycle::touch_task(&mut task, Utc::now());
                self.store.put_task(&task)?;
                self.record_change(actor, "task", &task.id, Some(&project.id), "backfilled", Some(&before), Some(&task));
                self.broadcast(actor, EventKind::TaskMoved, &task);
                report.tasks.push(task.id);
            }
            self.invalidate(&project.id)?;
        }
        info!(tasks = report.tasks.len(), actor, "backfill complete");
        Ok(report)
    }

    // =========================================================================
    // Bugs
    // =========================================================================

    pub fn create_bug(&mut self, actor: &str, project_id: &str, input: NewBug) -> Result<Bug> {
        let title = input.title.trim();
        if title.is_empty() {
            return Err(Error::InvalidArgument("bug title cannot be empty".to_string()));
        }
        self.require_active_project(project_id)?;

        let now = Utc::now();
        let bug = Bug {
            id: new_id(BUG_ID_PREFIX),
            project_id: project_id.to_string(),
            title: title.to_string(),
            severity: input.severity.unwrap_or(Severity::Medium),
            status: BugStatus::Open,
            linked_task_ids: input.linked_task_ids,
            repro_steps: input.repro_steps,
            proposed_fix: input.proposed_fix,
            version: 1,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.store.put_bug(&bug)?;
        info!(bug = %bug.id, project = project_id, actor, "bug created");
        self.record_change(actor, "bug", &bug.id, Some(project_id), "created", None, Some(&bug));
        self.broadcast(actor, EventKind::BugCreated, &bug);
        Ok(bug)
    }

    pub fn update_bug(
        &mut self,
        actor: &str,
        id: &str,
        update: BugUpdate,
        expected_version: u32,
    ) -> Result<Bug> {
        let before = self
            .store
            .get_bug(id, View::Active)?
            .ok_or_else(|| Error::not_found("bug", id))?;
        let mut bug = before.clone();
        lifecycle::apply_bug_update(&mut bug, update, expected_version, Utc::now())?;
        self.store.put_bug(&bug)?;
        info!(bug = id, version = bug.version, actor, "bug updated");
        self.record_change(actor, "bug", id, Some(&bug.project_id), "updated", Some(&before), Some(&bug));
        self.broadcast(actor, EventKind::BugUpdated, &bug);
        Ok(bug)
    }

    pub fn get_bug(&self, id: &str) -> Result<Bug> {
        self.store
            .get_bug(id, View::All)?
            .ok_or_else(|| Error::not_found("bug", id))
    }

    pub fn list_bugs(&self, project_id: Option<&str>, include_deleted: bool) -> Result<Vec<Bug>> {
        if let Some(project_id) = project_id {
            self.get_project(project_id)?;
        }
        self.store
            .list_bugs(project_id, View::including(include_deleted))
    }

    pub fn delete_bug(&mut self, actor: &str, id: &str) -> Result<(Bug, bool)> {
        self.set_bug_deleted(actor, id, true)
    }

    pub fn restore_bug(&mut self, actor: &str, id: &str) -> Result<(Bug, bool)> {
        self.set_bug_deleted(actor, id, false)
    }

    fn set_bug_deleted(&mut self, actor: &str, id: &str, deleted: bool) -> Result<(Bug, bool)> {
        let before = self.get_bug(id)?;
        if before.deleted_at.is_some() == deleted {
            return Ok((before, false));
        }
        let now = Utc::now();
        let mut bug = before.clone();
        bug.deleted_at = if deleted { Some(now) } else { None };
        lifecycle::touch_bug(&mut bug, now);
        self.store.put_bug(&bug)?;

        let (action, kind) = if deleted {
            ("deleted", EventKind::BugDeleted)
        } else {
            ("restored", EventKind::BugRestored)
        };
        info!(bug = id, actor, action, "bug delete state changed");
        self.record_change(actor, "bug", id, Some(&bug.project_id), action, Some(&before), Some(&bug));
        self.broadcast(actor, kind, &bug);
        Ok((bug, true))
    }

    // =========================================================================
    // Design notes
    // =========================================================================

    pub fn create_note(&mut self, actor: &str, project_id: &str, input: NewDesignNote) -> Result<DesignNote> {
        let title = bounded_text("title", &input.title, 3, 120)?;
        let context = bounded_text("context", &input.context, 10, 2000)?;
        let decision = bounded_text("decision", &input.decision, 5, 2000)?;
        let consequences = bounded_text("consequences", &input.consequences, 5, 2000)?;
        self.require_active_project(project_id)?;

        let note = DesignNote {
            id: new_id(NOTE_ID_PREFIX),
            project_id: project_id.to_string(),
            title,
            context,
            decision,
            consequences,
            superseded_by: None,
            actor: actor.to_string(),
            created_at: Utc::now(),
            deleted_at: None,
        };
        self.store.put_note(&note)?;
        info!(note = %note.id, project = project_id, actor, "design note created");
        self.record_change(actor, "design_note", &note.id, Some(project_id), "created", None, Some(&note));
        self.broadcast(actor, EventKind::DesignNoteCreated, &note);
        Ok(note)
    }

    pub fn get_note(&self, id: &str) -> Result<DesignNote> {
        self.store
            .get_note(id, View::All)?
            .ok_or_else(|| Error::not_found("design_note", id))
    }

    /// The newest `limit` notes, oldest first.
    pub fn list_notes(
        &self,
        project_id: Option<&str>,
        include_deleted: bool,
        limit: Option<usize>,
    ) -> Result<Vec<DesignNote>> {
        if let Some(project_id) = project_id {
            self.get_project(project_id)?;
        }
        let notes = self
            .store
            .list_notes(project_id, View::including(include_deleted))?;
        Ok(newest(notes, limit))
    }

    /// Mark `id` as replaced by `successor_id`. Both notes must be active and
    /// belong to the same project.
    pub fn supersede_note(&mut self, actor: &str, id: &str, successor_id: &str) -> Result<DesignNote> {
        if id == successor_id {
            return Err(Error::InvalidArgument(format!(
                "design note {id} cannot supersede itself"
            )));
        }
        let before = self
            .store
            .get_note(id, View::Active)?
            .ok_or_else(|| Error::not_found("design_note", id))?;
        let successor = self
            .store
            .get_note(successor_id, View::Active)?
            .ok_or_else(|| Error::not_found("design_note", successor_id))?;
        if successor.project_id != before.project_id {
            return Err(Error::InvalidArgument(format!(
                "design note {successor_id} belongs to project {}, not {}",
                successor.project_id, before.project_id
            )));
        }
        if before.superseded_by.as_deref() == Some(successor_id) {
            return Ok(before);
        }

        let mut note = before.clone();
        note.superseded_by = Some(successor_id.to_string());
        self.store.put_note(&note)?;
        info!(note = id, successor = successor_id, actor, "design note superseded");
        self.record_change(actor, "design_note", id, Some(&note.project_id), "superseded", Some(&before), Some(&note));
        self.broadcast(actor, EventKind::DesignNoteSuperseded, &note);
        Ok(note)
    }

    pub fn delete_note(&mut self, actor: &str, id: &str) -> Result<(DesignNote, bool)> {
        self.set_note_deleted(actor, id, true)
    }

    pub fn restore_note(&mut self, actor: &str, id: &str) -> Result<(DesignNote, bool)> {
        self.set_note_deleted(actor, id, false)
    }

    fn set_note_deleted(&mut self, actor: &str, id: &str, deleted: bool) -> Result<(DesignNote, bool)> {
        let before = self.get_note(id)?;
        if before.deleted_at.is_some() == deleted {
            return Ok((before, false));
        }
        let mut note = before.clone();
        note.deleted_at = if deleted { Some(Utc::now()) } else { None };
        self.store.put_note(&note)?;

        let (action, kind) = if deleted {
            ("deleted", EventKind::DesignNoteDeleted)
        } else {
            ("restored", EventKind::DesignNoteRestored)
        };
        info!(note = id, actor, action, "design note delete state changed");
        self.record_change(actor, "design_note", id, Some(&note.project_id), action, Some(&before), Some(&note));
        self.broadcast(actor, kind, &note);
        Ok((note, true))
    }

    // =========================================================================
    // Status updates
    // =========================================================================

    /// Append a progress message to a project, optionally about one of its
    /// active tasks.
    pub fn post_status_update(
        &mut self,
        actor: &str,
        project_id: &str,
        task_id: Option<&str>,
        message: &str,
    ) -> Result<StatusUpdate> {
        let message = bounded_text("message", message, 3, 500)?;
        self.require_active_project(project_id)?;
        if let Some(task_id) = task_id {
            let task = self.require_active_task(task_id)?;
            if task.project_id != project_id {
                return Err(Error::InvalidArgument(format!(
                    "task {task_id} belongs to project {}, not {project_id}",
                    task.project_id
                )));
            }
        }

        let update = StatusUpdate {
            id: new_id(UPDATE_ID_PREFIX),
            project_id: project_id.to_string(),
            task_id: task_id.map(str::to_string),
            actor: actor.to_string(),
            message,
            created_at: Utc::now(),
        };
        self.store.put_status_update(&update)?;
        info!(update = %update.id, project = project_id, actor, "status update posted");
        self.record_change(actor, "status_update", &update.id, Some(project_id), "created", None, Some(&update));
        self.broadcast(actor, EventKind::StatusUpdateCreated, &update);
        Ok(update)
    }

    /// The newest `limit` status updates, oldest first.
    pub fn list_status_updates(
        &self,
        project_id: Option<&str>,
        task_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<StatusUpdate>> {
        if let Some(project_id) = project_id {
            self.get_project(project_id)?;
        }
        let updates = self.store.list_status_updates(&UpdateFilter {
            project_id: project_id.map(str::to_string),
            task_id: task_id.map(str::to_string),
        })?;
        Ok(newest(updates, limit))
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// A project's own numbers, always computed fresh.
    pub fn compute_status(&self, project_id: &str) -> Result<ProjectStatus> {
        status::compute_status(&self.store, project_id)
    }

    /// Roll-up over the project's subtree, served from cache while fresh.
    pub fn compute_aggregated_status(&mut self, project_id: &str) -> Result<AggregatedStatus> {
        if let Some(cached) = self.cache.get(project_id) {
            return Ok(cached);
        }
        let fresh = status::compute_aggregated(&self.store, project_id)?;
        self.cache.put(project_id, fresh.clone());
        Ok(fresh)
    }

    /// Drop the cached roll-ups of a project and all its ancestors.
    pub fn invalidate(&mut self, project_id: &str) -> Result<()> {
        self.cache.invalidate(&self.store, project_id)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        self.audit.recent(limit)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn require_active_project(&self, id: &str) -> Result<Project> {
        self.store
            .get_project(id, View::Active)?
            .ok_or_else(|| Error::not_found("project", id))
    }

    fn require_active_task(&self, id: &str) -> Result<Task> {
        self.store
            .get_task(id, View::Active)?
            .ok_or_else(|| Error::not_found("task", id))
    }

    /// An active phase that belongs to `project_id`.
    fn require_phase_for(&self, project_id: &str, phase_id: &str) -> Result<Phase> {
        let phase = self
            .store
            .get_phase(phase_id, View::Active)?
            .ok_or_else(|| Error::not_found("phase", phase_id))?;
        if phase.project_id != project_id {
            return Err(Error::PhaseProjectMismatch {
                phase: phase.id,
                phase_project: phase.project_id,
                task_project: project_id.to_string(),
            });
        }
        Ok(phase)
    }

    #[allow(clippy::too_many_arguments)]
    fn record_change<T: Serialize>(
        &mut self,
        actor: &str,
        entity: &str,
        entity_id: &str,
        project_id: Option<&str>,
        action: &str,
        before: Option<&T>,
        after: Option<&T>,
    ) {
        match audit::diff(before, after) {
            Ok(diff) => self.record(AuditEntry::new(actor, entity, entity_id, project_id, action, diff)),
            Err(err) => warn!(entity, id = entity_id, error = %err, "audit diff failed"),
        }
    }

    fn record(&mut self, entry: AuditEntry) {
        if let Err(err) = self.audit.record(entry) {
            warn!(error = %err, "audit sink rejected entry");
        }
    }

    fn broadcast<T: Serialize>(&mut self, actor: &str, kind: EventKind, data: &T) {
        let Some(sink) = self.changes.as_mut() else {
            return;
        };
        let published = Event::new(kind, Some(actor.to_string()))
            .with_data(data)
            .and_then(|event| sink.publish(&event));
        if let Err(err) = published {
            warn!(event = ?kind, error = %err, "change sink rejected event");
        }
    }
}

/// Trimmed text whose length in characters lies within `min..=max`.
fn bounded_text(field: &str, value: &str, min: usize, max: usize) -> Result<String> {
    let value = value.trim();
    let len = value.chars().count();
    if len < min || len > max {
        return Err(Error::InvalidArgument(format!(
            "{field} must be {min} to {max} characters (got {len})"
        )));
    }
    Ok(value.to_string())
}

/// Keep the tail of a creation-ordered list, capped at [`MAX_LIST_LIMIT`].
fn newest<T>(mut items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    let skip = items.len().saturating_sub(limit);
    items.split_off(skip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBuffer;
    use crate::store::MemoryStore;

    const ACTOR: &str = "agent-1";

    fn tracker() -> Tracker<MemoryStore> {
        Tracker::new(MemoryStore::new()).expect("tracker")
    }

    #[test]
    fn root_project_is_seeded_and_cannot_be_archived() {
        let mut tracker = tracker();
        assert_eq!(tracker.get_project("default").expect("root").name, "Default Project");
        let err = tracker.archive_project(ACTOR, "default").expect_err("root");
        assert!(matches!(err, Error::RootProject(_)));
    }

    #[test]
    fn first_task_creates_default_phase() {
        let mut tracker = tracker();
        let task = tracker
            .create_task(ACTOR, "default", "first", None)
            .expect("task");
        assert_eq!(task.phase_id.as_deref(), Some("default-default"));
        assert_eq!(task.priority, Some(0));
        assert_eq!(task.version, 1);

        let second = tracker
            .create_task(ACTOR, "default", "second", None)
            .expect("task");
        assert_eq!(second.priority, Some(1));
        assert_eq!(tracker.list_phases("default", true).expect("phases").len(), 1);
    }

    #[test]
    fn all_phases_archived_leaves_task_unphased() {
        let mut tracker = tracker();
        let phase = tracker.create_phase(ACTOR, "default", "only").expect("phase");
        tracker.archive_phase(ACTOR, &phase.id).expect("archive");
        let task = tracker
            .create_task(ACTOR, "default", "floating", None)
            .expect("task");
        assert!(task.phase_id.is_none());
        assert!(task.priority.is_none());
    }

    #[test]
    fn explicit_phase_must_belong_to_project() {
        let mut tracker = tracker();
        let other = tracker.create_project(ACTOR, "Other", None).expect("project");
        let phase = tracker.create_phase(ACTOR, &other.id, "p").expect("phase");
        let err = tracker
            .create_task(ACTOR, "default", "x", Some(&phase.id))
            .expect_err("mismatch");
        assert!(matches!(err, Error::PhaseProjectMismatch { .. }));
    }

    #[test]
    fn move_into_archived_phase_is_not_found() {
        let mut tracker = tracker();
        let task = tracker.create_task(ACTOR, "default", "x", None).expect("task");
        let phase = tracker.create_phase(ACTOR, "default", "later").expect("phase");
        tracker.archive_phase(ACTOR, &phase.id).expect("archive");
        let err = tracker
            .move_task(ACTOR, &task.id, &phase.id, None)
            .expect_err("archived");
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn delete_and_restore_are_idempotent() {
        let mut tracker = tracker();
        let task = tracker.create_task(ACTOR, "default", "x", None).expect("task");

        let (deleted, changed) = tracker.delete_task(ACTOR, &task.id).expect("delete");
        assert!(changed);
        assert_eq!(deleted.version, 2);
        let (again, changed) = tracker.delete_task(ACTOR, &task.id).expect("delete");
        assert!(!changed);
        assert_eq!(again.version, 2);

        let err = tracker
            .transition_task(ACTOR, &task.id, TaskStatus::InProgress, "go", 2, None)
            .expect_err("deleted");
        assert!(matches!(err, Error::NotFound { .. }));

        let (restored, changed) = tracker.restore_task(ACTOR, &task.id).expect("restore");
        assert!(changed);
        assert_eq!(restored.version, 3);
    }

    #[test]
    fn mutations_reach_sinks() {
        let buffer = EventBuffer::new();
        let mut tracker = tracker().with_change_sink(Box::new(buffer.clone()));
        let task = tracker.create_task(ACTOR, "default", "x", None).expect("task");
        tracker
            .transition_task(ACTOR, &task.id, TaskStatus::InProgress, "go", 1, None)
            .expect("transition");

        assert_eq!(
            buffer.kinds(),
            vec![EventKind::PhaseCreated, EventKind::TaskCreated, EventKind::TaskUpdated]
        );
        let audit = tracker.recent_audit(10).expect("audit");
        let actions: Vec<&str> = audit.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["created", "created", "transitioned"]);
        assert_eq!(audit[2].diff["status"].to, serde_json::json!("in_progress"));
    }

    #[test]
    fn rejected_transition_emits_nothing() {
        let buffer = EventBuffer::new();
        let mut tracker = tracker().with_change_sink(Box::new(buffer.clone()));
        let task = tracker.create_task(ACTOR, "default", "x", None).expect("task");
        let before = buffer.events().len();
        assert!(tracker
            .transition_task(ACTOR, &task.id, TaskStatus::Done, "skip", 1, None)
            .is_err());
        assert_eq!(buffer.events().len(), before);
        assert_eq!(tracker.get_task(&task.id).expect("task").version, 1);
    }

    #[test]
    fn backfill_attaches_unphased_tasks() {
        let mut tracker = tracker();
        let mut loose = Task::new("default", "legacy");
        loose.created_at = Utc::now() - chrono::Duration::seconds(10);
        tracker.store_mut().put_task(&loose).expect("put");

        let report = tracker.backfill_phases(ACTOR).expect("backfill");
        assert_eq!(report.tasks, vec![loose.id.clone()]);
        assert_eq!(report.phases_created, vec!["default-default".to_string()]);
        let task = tracker.get_task(&loose.id).expect("task");
        assert_eq!(task.priority, Some(0));
        assert_eq!(task.version, 2);

        let again = tracker.backfill_phases(ACTOR).expect("backfill");
        assert!(again.tasks.is_empty());
    }

    #[test]
    fn bug_lifecycle() {
        let mut tracker = tracker();
        let bug = tracker
            .create_bug(
                ACTOR,
                "default",
                NewBug {
                    title: "crash on save".to_string(),
                    ..NewBug::default()
                },
            )
            .expect("bug");
        assert_eq!(bug.severity, Severity::Medium);
        assert_eq!(bug.status, BugStatus::Open);

        let update = BugUpdate {
            status: Some(BugStatus::Triaged),
            ..BugUpdate::default()
        };
        let err = tracker
            .update_bug(ACTOR, &bug.id, update.clone(), 5)
            .expect_err("stale");
        assert!(matches!(err, Error::VersionConflict { current: 1, .. }));

        let updated = tracker.update_bug(ACTOR, &bug.id, update, 1).expect("update");
        assert_eq!(updated.version, 2);
        assert_eq!(updated.status, BugStatus::Triaged);

        tracker.delete_bug(ACTOR, &bug.id).expect("delete");
        assert!(tracker.list_bugs(Some("default"), false).expect("list").is_empty());
        assert_eq!(tracker.list_bugs(Some("default"), true).expect("list").len(), 1);
    }

    fn sample_note(title: &str) -> NewDesignNote {
        NewDesignNote {
            title: title.to_string(),
            context: "storage needs to survive restarts".to_string(),
            decision: "embed a database".to_string(),
            consequences: "one more file to back up".to_string(),
        }
    }

    #[test]
    fn design_notes_validate_supersede_and_soft_delete() {
        let buffer = EventBuffer::new();
        let mut tracker = tracker().with_change_sink(Box::new(buffer.clone()));

        let err = tracker
            .create_note(ACTOR, "default", NewDesignNote { context: "too short".to_string(), ..sample_note("Storage") })
            .expect_err("short context");
        assert!(matches!(err, Error::InvalidArgument(_)));

        let first = tracker.create_note(ACTOR, "default", sample_note("Storage v1")).expect("note");
        let second = tracker.create_note(ACTOR, "default", sample_note("Storage v2")).expect("note");
        assert_eq!(first.actor, ACTOR);

        let superseded = tracker
            .supersede_note(ACTOR, &first.id, &second.id)
            .expect("supersede");
        assert_eq!(superseded.superseded_by.as_deref(), Some(second.id.as_str()));
        let err = tracker
            .supersede_note(ACTOR, &second.id, &second.id)
            .expect_err("self");
        assert!(matches!(err, Error::InvalidArgument(_)));

        let (_, changed) = tracker.delete_note(ACTOR, &first.id).expect("delete");
        assert!(changed);
        let (_, changed) = tracker.delete_note(ACTOR, &first.id).expect("delete again");
        assert!(!changed);
        let active: Vec<String> = tracker
            .list_notes(Some("default"), false, None)
            .expect("list")
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(active, vec![second.id.clone()]);
        assert_eq!(tracker.list_notes(None, true, None).expect("list").len(), 2);

        assert_eq!(
            buffer.kinds(),
            vec![
                EventKind::DesignNoteCreated,
                EventKind::DesignNoteCreated,
                EventKind::DesignNoteSuperseded,
                EventKind::DesignNoteDeleted,
            ]
        );
    }

    #[test]
    fn status_updates_keep_the_newest_window() {
        let mut tracker = tracker();
        let task = tracker.create_task(ACTOR, "default", "x", None).expect("task");
        for n in 0..5 {
            let task_id = (n % 2 == 0).then_some(task.id.as_str());
            tracker
                .post_status_update(ACTOR, "default", task_id, &format!("update {n}"))
                .expect("post");
        }

        let messages: Vec<String> = tracker
            .list_status_updates(Some("default"), None, Some(2))
            .expect("list")
            .into_iter()
            .map(|u| u.message)
            .collect();
        assert_eq!(messages, vec!["update 3", "update 4"]);
        assert_eq!(
            tracker
                .list_status_updates(None, Some(&task.id), None)
                .expect("list")
                .len(),
            3
        );

        let err = tracker
            .post_status_update(ACTOR, "default", None, "ok")
            .expect_err("short");
        assert!(matches!(err, Error::InvalidArgument(_)));
        let err = tracker
            .post_status_update(ACTOR, "default", Some("t-missing"), "about nothing")
            .expect_err("missing task");
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn listing_window_is_capped() {
        let items: Vec<usize> = (0..500).collect();
        assert_eq!(newest(items.clone(), None).len(), DEFAULT_LIST_LIMIT);
        let capped = newest(items, Some(10_000));
        assert_eq!(capped.len(), MAX_LIST_LIMIT);
        assert_eq!(capped.first(), Some(&300));
    }

    #[test]
    fn ordered_listing_uses_next_action_order() {
        let mut tracker = tracker();
        let late = tracker.create_phase(ACTOR, "default", "late").expect("phase");
        let early = tracker.create_phase(ACTOR, "default", "early").expect("phase");
        tracker
            .reorder_phases(ACTOR, &[(early.id.clone(), 0), (late.id.clone(), 1)])
            .expect("reorder");
        let in_late = tracker
            .create_task(ACTOR, "default", "late work", Some(&late.id))
            .expect("task");
        let in_early = tracker
            .create_task(ACTOR, "default", "early work", Some(&early.id))
            .expect("task");

        let ordered = tracker
            .list_tasks(&TaskQuery {
                project_id: Some("default".to_string()),
                ordered: true,
                ..TaskQuery::default()
            })
            .expect("list");
        let ids: Vec<&str> = ordered.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![in_early.id.as_str(), in_late.id.as_str()]);
    }
}
