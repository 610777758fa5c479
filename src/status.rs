//! Project status snapshots and recursive roll-ups.
//!
//! Base status covers one project's own tasks and is always computed fresh.
//! Aggregated status adds totals summed over every active descendant, while
//! `rollup.children` lists only the direct children.
//!
//! Tasks sitting in an archived phase are left out of totals, active counts
//! and next-task selection. Unphased tasks still count.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::hierarchy;
use crate::model::{Phase, Task};
use crate::store::{EntityStore, TaskFilter, View};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRef {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Totals {
    pub tasks: usize,
    pub done: usize,
}

impl Totals {
    pub fn completion_pct(&self) -> f64 {
        completion_pct(self.done, self.tasks)
    }
}

/// One project's own numbers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectStatus {
    pub project_id: String,
    pub completion_pct: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_phase: Option<PhaseRef>,
    pub active_task_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_priority_task: Option<TaskRef>,
    pub totals: Totals,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatedTotals {
    pub tasks: usize,
    pub done: usize,
    pub completion_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rollup {
    pub child_count: usize,
    pub aggregated: AggregatedTotals,
    /// Direct children only.
    pub children: Vec<ProjectStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatedStatus {
    #[serde(flatten)]
    pub status: ProjectStatus,
    pub rollup: Rollup,
}

/// `100 * done / total` rounded to two decimals; zero when empty.
pub fn completion_pct(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = done as f64 * 100.0 / total as f64;
    (pct * 100.0).round() / 100.0
}

/// Next-action ordering: phase order, then intra-phase priority, then age.
///
/// Missing phase or priority sorts after every present value.
pub fn next_action_cmp(left: &Task, right: &Task, phase_index: &HashMap<String, i64>) -> Ordering {
    let key = |task: &Task| {
        let phase = task
            .phase_id
            .as_ref()
            .and_then(|id| phase_index.get(id).copied())
            .unwrap_or(i64::MAX);
        (phase, task.priority.unwrap_or(i64::MAX))
    };
    key(left)
        .cmp(&key(right))
        .then_with(|| left.created_at.cmp(&right.created_at))
        .then_with(|| left.id.cmp(&right.id))
}

/// Map of active phase id to order index.
pub fn phase_index(phases: &[Phase]) -> HashMap<String, i64> {
    phases
        .iter()
        .filter(|phase| phase.is_active())
        .map(|phase| (phase.id.clone(), phase.order_index))
        .collect()
}

/// Non-deleted tasks of a project that are not parked in an archived phase.
pub fn counted_tasks<S: EntityStore + ?Sized>(store: &S, project_id: &str) -> Result<Vec<Task>> {
    let archived: HashSet<String> = store
        .list_phases(project_id, View::All)?
        .into_iter()
        .filter(|phase| !phase.is_active())
        .map(|phase| phase.id)
        .collect();
    Ok(store
        .list_tasks(&TaskFilter::project(project_id), View::Active)?
        .into_iter()
        .filter(|task| {
            task.phase_id
                .as_ref()
                .map_or(true, |phase_id| !archived.contains(phase_id))
        })
        .collect())
}

/// Compute one project's own status.
///
/// Missing or archived projects are `NotFound`.
pub fn compute_status<S: EntityStore + ?Sized>(store: &S, project_id: &str) -> Result<ProjectStatus> {
    if store.get_project(project_id, View::Active)?.is_none() {
        return Err(Error::not_found("project", project_id));
    }

    let phases = store.list_phases(project_id, View::Active)?;
    let tasks = counted_tasks(store, project_id)?;
    let done = tasks.iter().filter(|task| task.status.is_done()).count();
    let totals = Totals {
        tasks: tasks.len(),
        done,
    };
    let open: Vec<&Task> = tasks.iter().filter(|task| !task.status.is_done()).collect();

    let active_phase = phases
        .iter()
        .find(|phase| {
            open.iter()
                .any(|task| task.phase_id.as_deref() == Some(phase.id.as_str()))
        })
        .or_else(|| phases.last())
        .map(|phase| PhaseRef {
            id: phase.id.clone(),
            name: phase.name.clone(),
        });

    let index = phase_index(&phases);
    let next_priority_task = open
        .iter()
        .min_by(|left, right| next_action_cmp(left, right, &index))
        .map(|task| TaskRef {
            id: task.id.clone(),
            title: task.title.clone(),
            phase_id: task.phase_id.clone(),
        });

    Ok(ProjectStatus {
        project_id: project_id.to_string(),
        completion_pct: totals.completion_pct(),
        active_phase,
        active_task_count: open.len(),
        next_priority_task,
        totals,
        generated_at: Utc::now(),
    })
}

/// Compute a project's status with totals rolled up over its whole subtree.
pub fn compute_aggregated<S: EntityStore + ?Sized>(
    store: &S,
    project_id: &str,
) -> Result<AggregatedStatus> {
    let base = compute_status(store, project_id)?;

    let mut sum = base.totals;
    for descendant in hierarchy::descendants(store, project_id)? {
        let status = compute_status(store, &descendant)?;
        sum.tasks += status.totals.tasks;
        sum.done += status.totals.done;
    }

    let mut children = Vec::new();
    for child in store.list_children(project_id, View::Active)? {
        children.push(compute_status(store, &child.id)?);
    }
    debug!(
        project = project_id,
        children = children.len(),
        tasks = sum.tasks,
        done = sum.done,
        "aggregated status computed"
    );

    Ok(AggregatedStatus {
        status: base,
        rollup: Rollup {
            child_count: children.len(),
            aggregated: AggregatedTotals {
                tasks: sum.tasks,
                done: sum.done,
                completion_pct: sum.completion_pct(),
            },
            children,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Project, TaskStatus};
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn phase(id: &str, project: &str, index: i64) -> Phase {
        Phase {
            id: id.to_string(),
            project_id: project.to_string(),
            name: id.to_string(),
            order_index: index,
            created_at: Utc::now(),
            archived_at: None,
        }
    }

    fn task(store: &mut MemoryStore, project: &str, phase: Option<&str>, priority: Option<i64>, status: TaskStatus) -> Task {
        let mut task = Task::new(project, format!("task {}", priority.unwrap_or(-1)));
        task.phase_id = phase.map(str::to_string);
        task.priority = priority;
        task.status = status;
        store.put_task(&task).expect("put");
        task
    }

    fn seeded() -> MemoryStore {
        let mut store = MemoryStore::new();
        store.put_project(&Project::new("p", "P", None)).expect("put");
        store
            .put_phases(&[phase("ph-0", "p", 0), phase("ph-1", "p", 1)])
            .expect("put");
        store
    }

    #[test]
    fn completion_rounds_to_two_decimals() {
        assert_eq!(completion_pct(0, 0), 0.0);
        assert_eq!(completion_pct(4, 6), 66.67);
        assert_eq!(completion_pct(1, 3), 33.33);
        assert_eq!(completion_pct(3, 3), 100.0);
    }

    #[test]
    fn missing_or_archived_project_is_not_found() {
        let mut store = MemoryStore::new();
        assert!(matches!(compute_status(&store, "nope"), Err(Error::NotFound { .. })));
        let mut project = Project::new("p", "P", None);
        project.archived_at = Some(Utc::now());
        store.put_project(&project).expect("put");
        assert!(matches!(compute_status(&store, "p"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn active_phase_is_first_with_open_work() {
        let mut store = seeded();
        task(&mut store, "p", Some("ph-0"), Some(0), TaskStatus::Done);
        task(&mut store, "p", Some("ph-1"), Some(0), TaskStatus::Todo);

        let status = compute_status(&store, "p").expect("status");
        assert_eq!(status.active_phase.expect("phase").id, "ph-1");
        assert_eq!(status.active_task_count, 1);
        assert_eq!(status.totals, Totals { tasks: 2, done: 1 });
        assert_eq!(status.completion_pct, 50.0);
    }

    #[test]
    fn active_phase_falls_back_to_last_when_all_done() {
        let mut store = seeded();
        task(&mut store, "p", Some("ph-0"), Some(0), TaskStatus::Done);
        let status = compute_status(&store, "p").expect("status");
        assert_eq!(status.active_phase.expect("phase").id, "ph-1");
        assert!(status.next_priority_task.is_none());
    }

    #[test]
    fn next_task_follows_phase_then_priority_then_age() {
        let mut store = seeded();
        let unphased = task(&mut store, "p", None, None, TaskStatus::Todo);
        let late_phase = task(&mut store, "p", Some("ph-1"), Some(0), TaskStatus::Todo);
        let low_priority = task(&mut store, "p", Some("ph-0"), Some(3), TaskStatus::Todo);
        let mut older = Task::new("p", "older");
        older.phase_id = Some("ph-0".to_string());
        older.priority = Some(3);
        older.created_at = low_priority.created_at - Duration::seconds(5);
        store.put_task(&older).expect("put");

        let status = compute_status(&store, "p").expect("status");
        assert_eq!(status.next_priority_task.expect("next").id, older.id);

        let index = phase_index(&store.list_phases("p", View::Active).expect("phases"));
        let mut all = vec![unphased.clone(), late_phase.clone(), low_priority.clone(), older.clone()];
        all.sort_by(|a, b| next_action_cmp(a, b, &index));
        let ids: Vec<&str> = all.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                older.id.as_str(),
                low_priority.id.as_str(),
                late_phase.id.as_str(),
                unphased.id.as_str()
            ]
        );
    }

    #[test]
    fn archived_phase_tasks_are_excluded() {
        let mut store = seeded();
        task(&mut store, "p", Some("ph-0"), Some(0), TaskStatus::Todo);
        task(&mut store, "p", Some("ph-1"), Some(0), TaskStatus::Done);
        let mut archived = phase("ph-1", "p", 1);
        archived.archived_at = Some(Utc::now());
        store.put_phase(&archived).expect("put");

        let status = compute_status(&store, "p").expect("status");
        assert_eq!(status.totals, Totals { tasks: 1, done: 0 });
        assert_eq!(status.active_phase.expect("phase").id, "ph-0");
    }

    #[test]
    fn rollup_sums_subtree_but_lists_direct_children() {
        let mut store = MemoryStore::new();
        store.put_project(&Project::new("root", "Root", None)).expect("put");
        store
            .put_project(&Project::new("mid", "Mid", Some("root".to_string())))
            .expect("put");
        store
            .put_project(&Project::new("leaf", "Leaf", Some("mid".to_string())))
            .expect("put");
        for (project, total, done) in [("root", 1, 1), ("mid", 2, 1), ("leaf", 3, 2)] {
            for idx in 0..total {
                let status = if idx < done { TaskStatus::Done } else { TaskStatus::Todo };
                task(&mut store, project, None, None, status);
            }
        }

        let agg = compute_aggregated(&store, "root").expect("aggregate");
        assert_eq!(agg.rollup.aggregated.tasks, 6);
        assert_eq!(agg.rollup.aggregated.done, 4);
        assert_eq!(agg.rollup.aggregated.completion_pct, 66.67);
        assert_eq!(agg.rollup.child_count, 1);
        assert_eq!(agg.rollup.children[0].project_id, "mid");
        assert_eq!(agg.status.totals, Totals { tasks: 1, done: 1 });
    }

    #[test]
    fn leaf_rollup_reports_own_totals() {
        let mut store = seeded();
        task(&mut store, "p", Some("ph-0"), Some(0), TaskStatus::Todo);
        let agg = compute_aggregated(&store, "p").expect("aggregate");
        assert_eq!(agg.rollup.child_count, 0);
        assert_eq!(agg.rollup.aggregated.tasks, 1);
        assert!(agg.rollup.children.is_empty());
    }

    #[test]
    fn aggregated_serializes_flat_with_rollup() {
        let store = seeded();
        let agg = compute_aggregated(&store, "p").expect("aggregate");
        let value = serde_json::to_value(&agg).expect("serialize");
        assert_eq!(value["project_id"], "p");
        assert_eq!(value["rollup"]["child_count"], 0);
    }
}
