//! Time-boxed cache of aggregated project status.
//!
//! Only roll-ups are cached. An entry is served while younger than the TTL;
//! `invalidate` drops a project's entry and every ancestor's, since all of
//! their roll-ups include the mutated project.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::hierarchy;
use crate::status::AggregatedStatus;
use crate::store::EntityStore;

pub const DEFAULT_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct CacheEntry {
    value: AggregatedStatus,
    stored_at: Instant,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

#[derive(Debug, Clone)]
pub struct StatusCache {
    ttl: Duration,
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

impl Default for StatusCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl StatusCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn get(&mut self, project_id: &str) -> Option<AggregatedStatus> {
        self.get_at(project_id, Instant::now())
    }

    /// Look up an entry as of `now`; stale entries are dropped and count as misses.
    pub fn get_at(&mut self, project_id: &str, now: Instant) -> Option<AggregatedStatus> {
        let fresh = match self.entries.get(project_id) {
            Some(entry) => now.saturating_duration_since(entry.stored_at) < self.ttl,
            None => false,
        };
        if fresh {
            self.stats.hits += 1;
            debug!(project = project_id, "status cache hit");
            return self.entries.get(project_id).map(|entry| entry.value.clone());
        }
        self.entries.remove(project_id);
        self.stats.misses += 1;
        debug!(project = project_id, "status cache miss");
        None
    }

    pub fn put(&mut self, project_id: &str, value: AggregatedStatus) {
        self.put_at(project_id, value, Instant::now());
    }

    pub fn put_at(&mut self, project_id: &str, value: AggregatedStatus, now: Instant) {
        self.entries.insert(
            project_id.to_string(),
            CacheEntry {
                value,
                stored_at: now,
            },
        );
    }

    /// Drop one entry without touching ancestors.
    pub fn remove(&mut self, project_id: &str) -> bool {
        self.entries.remove(project_id).is_some()
    }

    /// Drop `project_id` and every ancestor on its parent chain.
    pub fn invalidate<S: EntityStore + ?Sized>(&mut self, store: &S, project_id: &str) -> Result<()> {
        self.stats.invalidations += 1;
        self.remove(project_id);
        for ancestor in hierarchy::ancestors(store, project_id)? {
            self.remove(&ancestor);
        }
        debug!(project = project_id, "status cache invalidated up the parent chain");
        Ok(())
    }

    #[cfg(test)]
    fn contains(&self, project_id: &str) -> bool {
        self.entries.contains_key(project_id)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Project;
    use crate::status::compute_aggregated;
    use crate::store::MemoryStore;

    fn store() -> MemoryStore {
        let mut store = MemoryStore::new();
        store.put_project(&Project::new("root", "Root", None)).expect("put");
        store
            .put_project(&Project::new("mid", "Mid", Some("root".to_string())))
            .expect("put");
        store
            .put_project(&Project::new("leaf", "Leaf", Some("mid".to_string())))
            .expect("put");
        store.put_project(&Project::new("other", "Other", None)).expect("put");
        store
    }

    fn fill(cache: &mut StatusCache, store: &MemoryStore, ids: &[&str]) {
        for id in ids {
            cache.put(id, compute_aggregated(store, id).expect("aggregate"));
        }
    }

    #[test]
    fn entry_expires_after_ttl() {
        let store = store();
        let mut cache = StatusCache::new(Duration::from_secs(10));
        let start = Instant::now();
        cache.put_at("root", compute_aggregated(&store, "root").expect("agg"), start);

        assert!(cache.get_at("root", start + Duration::from_secs(9)).is_some());
        assert!(cache.get_at("root", start + Duration::from_secs(10)).is_none());
        assert!(!cache.contains("root"));
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                invalidations: 0
            }
        );
    }

    #[test]
    fn invalidate_bubbles_to_ancestors_only() {
        let store = store();
        let mut cache = StatusCache::default();
        fill(&mut cache, &store, &["root", "mid", "leaf", "other"]);

        cache.invalidate(&store, "leaf").expect("invalidate");
        assert!(!cache.contains("leaf"));
        assert!(!cache.contains("mid"));
        assert!(!cache.contains("root"));
        assert!(cache.contains("other"));
    }

    #[test]
    fn invalidating_mid_keeps_leaf() {
        let store = store();
        let mut cache = StatusCache::default();
        fill(&mut cache, &store, &["root", "mid", "leaf"]);

        cache.invalidate(&store, "mid").expect("invalidate");
        assert!(cache.contains("leaf"));
        assert_eq!(cache.len(), 1);
    }
}
