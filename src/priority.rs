//! Intra-phase priority.
//!
//! Priorities are local to a phase: a task entering a phase goes to the end of
//! that phase's sequence (max + 1 among non-deleted tasks). Gaps left by
//! deletes or moves are never compacted; ordering only relies on value order.

use crate::error::Result;
use crate::store::{EntityStore, TaskFilter, View};

/// Priority for a task appended to `phase_id`, ignoring `exclude` itself.
pub fn next_in_phase<S: EntityStore + ?Sized>(
    store: &S,
    phase_id: &str,
    exclude: Option<&str>,
) -> Result<i64> {
    let max = store
        .list_tasks(&TaskFilter::phase(phase_id), View::Active)?
        .into_iter()
        .filter(|task| Some(task.id.as_str()) != exclude)
        .filter_map(|task| task.priority)
        .max();
    Ok(max.map_or(0, |value| value + 1))
}
