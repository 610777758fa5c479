//! Project parent/child links.
//!
//! The parent chain stays acyclic: a new parent is accepted only if walking up
//! from it never reaches the project being moved. Every walk carries a visited
//! set so a corrupted store cannot loop forever.

use std::collections::HashSet;

use tracing::warn;

use crate::error::{Error, Result};
use crate::model::Project;
use crate::store::{EntityStore, View};

/// Validate `parent_id` as the new parent of `id`.
///
/// Rejects self-parenting with `CycleSelf` and any parent whose ancestor chain
/// contains `id` with `CycleDetected`. The parent must exist and be active.
pub fn check_parent<S: EntityStore + ?Sized>(
    store: &S,
    id: &str,
    parent_id: Option<&str>,
) -> Result<()> {
    let Some(parent_id) = parent_id else {
        return Ok(());
    };
    if parent_id == id {
        return Err(Error::CycleSelf(id.to_string()));
    }
    if store.get_project(parent_id, View::Active)?.is_none() {
        return Err(Error::not_found("project", parent_id));
    }

    let mut visited = HashSet::new();
    let mut current = Some(parent_id.to_string());
    while let Some(cursor) = current {
        if cursor == id {
            return Err(Error::CycleDetected {
                id: id.to_string(),
                parent: parent_id.to_string(),
            });
        }
        if !visited.insert(cursor.clone()) {
            warn!(project = %cursor, "existing parent chain loops; stopping walk");
            break;
        }
        current = store
            .get_project(&cursor, View::All)?
            .and_then(|project| project.parent_id);
    }
    Ok(())
}

/// Re-point `id` at `parent_id` (or detach it with `None`).
///
/// Returns the project before and after the change. Nothing is written when a
/// check fails.
pub fn set_parent<S: EntityStore + ?Sized>(
    store: &mut S,
    id: &str,
    parent_id: Option<&str>,
) -> Result<(Project, Project)> {
    let before = store
        .get_project(id, View::All)?
        .ok_or_else(|| Error::not_found("project", id))?;
    check_parent(store, id, parent_id)?;

    let mut after = before.clone();
    after.parent_id = parent_id.map(str::to_string);
    if after != before {
        store.put_project(&after)?;
    }
    Ok((before, after))
}

/// Direct children only.
pub fn children<S: EntityStore + ?Sized>(store: &S, id: &str, view: View) -> Result<Vec<Project>> {
    store.list_children(id, view)
}

/// Ids on the parent chain of `id`, nearest first, excluding `id` itself.
pub fn ancestors<S: EntityStore + ?Sized>(store: &S, id: &str) -> Result<Vec<String>> {
    let mut chain = Vec::new();
    let mut visited = HashSet::from([id.to_string()]);
    let mut current = store
        .get_project(id, View::All)?
        .and_then(|project| project.parent_id);
    while let Some(cursor) = current {
        if !visited.insert(cursor.clone()) {
            warn!(project = %cursor, "parent chain loops; stopping walk");
            break;
        }
        current = store
            .get_project(&cursor, View::All)?
            .and_then(|project| project.parent_id);
        chain.push(cursor);
    }
    Ok(chain)
}

/// All active transitive descendants of `id`, depth first, excluding `id`.
///
/// Archived projects are pruned together with their subtrees.
pub fn descendants<S: EntityStore + ?Sized>(store: &S, id: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let mut visited = HashSet::from([id.to_string()]);
    let mut stack = vec![id.to_string()];
    while let Some(current) = stack.pop() {
        let children = store.list_children(&current, View::Active)?;
        // Reverse so the first child is visited first.
        for child in children.into_iter().rev() {
            if visited.insert(child.id.clone()) {
                stack.push(child.id);
            } else {
                warn!(project = %child.id, "project reached twice while collecting descendants");
            }
        }
        if current != id {
            out.push(current);
        }
    }
    Ok(out)
}
