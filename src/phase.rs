//! Phase ordering.
//!
//! Non-archived phases of a project keep dense order indices `0..N-1` after
//! every reorder. New phases append at the end, counting archived ones, and
//! archiving leaves indices untouched.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Utc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{new_id, Phase, PHASE_ID_PREFIX};
use crate::store::{sort_phases, EntityStore, View};

/// Suffix for the implicitly created phase id (`<project>-default`).
const DEFAULT_PHASE_SUFFIX: &str = "default";

/// Append a new phase to the end of a project's ordering.
pub fn create<S: EntityStore + ?Sized>(store: &mut S, project_id: &str, name: &str) -> Result<Phase> {
    create_with_id(store, new_id(PHASE_ID_PREFIX), project_id, name)
}

fn create_with_id<S: EntityStore + ?Sized>(
    store: &mut S,
    id: String,
    project_id: &str,
    name: &str,
) -> Result<Phase> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidArgument("phase name cannot be empty".to_string()));
    }
    let count = store.list_phases(project_id, View::All)?.len();
    let phase = Phase {
        id,
        project_id: project_id.to_string(),
        name: name.to_string(),
        order_index: count as i64,
        created_at: Utc::now(),
        archived_at: None,
    };
    store.put_phase(&phase)?;
    debug!(phase = %phase.id, project = project_id, index = phase.order_index, "phase created");
    Ok(phase)
}

/// A phase whose order index changed during a reorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexChange {
    pub phase_id: String,
    pub project_id: String,
    pub from: i64,
    pub to: i64,
}

/// Result of a reorder: every project touched and every index that moved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reordered {
    pub projects: Vec<String>,
    pub changes: Vec<IndexChange>,
}

/// Apply requested indices verbatim, then renumber every affected project.
///
/// Unknown ids are ignored. All writes land in one batch.
pub fn reorder<S: EntityStore + ?Sized>(
    store: &mut S,
    requests: &[(String, i64)],
) -> Result<Reordered> {
    let mut requested: HashMap<&str, i64> = HashMap::new();
    let mut projects = BTreeSet::new();
    for (id, index) in requests {
        match store.get_phase(id, View::All)? {
            Some(phase) => {
                requested.insert(id.as_str(), *index);
                projects.insert(phase.project_id);
            }
            None => debug!(phase = %id, "reorder skipped unknown phase"),
        }
    }

    let mut writes = Vec::new();
    let mut changes = Vec::new();
    for project_id in &projects {
        let mut phases = store.list_phases(project_id, View::All)?;
        let before: BTreeMap<String, i64> = phases
            .iter()
            .map(|phase| (phase.id.clone(), phase.order_index))
            .collect();
        for phase in phases.iter_mut() {
            if let Some(index) = requested.get(phase.id.as_str()) {
                phase.order_index = *index;
            }
        }
        normalize(&mut phases);
        for phase in phases {
            let from = before.get(&phase.id).copied().unwrap_or(phase.order_index);
            if from != phase.order_index {
                changes.push(IndexChange {
                    phase_id: phase.id.clone(),
                    project_id: phase.project_id.clone(),
                    from,
                    to: phase.order_index,
                });
                writes.push(phase);
            }
        }
    }

    if !writes.is_empty() {
        store.put_phases(&writes)?;
    }
    Ok(Reordered {
        projects: projects.into_iter().collect(),
        changes,
    })
}

/// Renumber the non-archived phases to `0..N-1` by current index.
///
/// Collisions break by creation time, then id. Archived phases keep whatever
/// index they carry.
pub fn normalize(phases: &mut [Phase]) {
    sort_phases(phases);
    let mut next = 0;
    for phase in phases.iter_mut().filter(|phase| phase.is_active()) {
        phase.order_index = next;
        next += 1;
    }
}

/// Mark or clear a phase's archive timestamp.
///
/// Returns the phase and whether anything changed.
pub fn set_archived<S: EntityStore + ?Sized>(
    store: &mut S,
    id: &str,
    archived: bool,
) -> Result<(Phase, bool)> {
    let mut phase = store
        .get_phase(id, View::All)?
        .ok_or_else(|| Error::not_found("phase", id))?;
    if phase.archived_at.is_some() == archived {
        return Ok((phase, false));
    }
    phase.archived_at = if archived { Some(Utc::now()) } else { None };
    store.put_phase(&phase)?;
    Ok((phase, true))
}

/// First non-archived phase by order index.
pub fn first_active<S: EntityStore + ?Sized>(store: &S, project_id: &str) -> Result<Option<Phase>> {
    Ok(store.list_phases(project_id, View::Active)?.into_iter().next())
}

/// Create the default phase if the project has no phases at all.
///
/// Existing phases, archived or not, make this a no-op. Returns the created
/// phase, if any.
pub fn ensure_default<S: EntityStore + ?Sized>(
    store: &mut S,
    project_id: &str,
    name: &str,
) -> Result<Option<Phase>> {
    if !store.list_phases(project_id, View::All)?.is_empty() {
        return Ok(None);
    }
    let id = format!("{project_id}-{DEFAULT_PHASE_SUFFIX}");
    let phase = create_with_id(store, id, project_id, name)?;
    Ok(Some(phase))
}

/// Whether the non-archived phases form exactly `0..N-1`.
pub fn is_dense(phases: &[Phase]) -> bool {
    let mut indices: Vec<i64> = phases
        .iter()
        .filter(|phase| phase.is_active())
        .map(|phase| phase.order_index)
        .collect();
    indices.sort_unstable();
    indices
        .iter()
        .enumerate()
        .all(|(expected, actual)| *actual == expected as i64)
}
