//! Audit trail of accepted mutations.
//!
//! Each entry records who changed what, with a field-level before/after diff.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use ulid::Ulid;

use crate::error::Result;
use crate::lock::{FileLock, DEFAULT_LOCK_TIMEOUT_MS};
use crate::storage::Storage;

pub const DEFAULT_MAX_ENTRIES: usize = 5000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldChange {
    pub from: serde_json::Value,
    pub to: serde_json::Value,
}

pub type Diff = BTreeMap<String, FieldChange>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub id: String,
    pub at: DateTime<Utc>,
    pub actor: String,
    pub entity: String,
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub action: String,
    #[serde(default)]
    pub diff: Diff,
}

impl AuditEntry {
    pub fn new(
        actor: &str,
        entity: &str,
        entity_id: &str,
        project_id: Option<&str>,
        action: &str,
        diff: Diff,
    ) -> Self {
        Self {
            id: Ulid::new().to_string().to_lowercase(),
            at: Utc::now(),
            actor: actor.to_string(),
            entity: entity.to_string(),
            entity_id: entity_id.to_string(),
            project_id: project_id.map(str::to_string),
            action: action.to_string(),
            diff,
        }
    }
}

/// Top-level field diff between two serialized records.
///
/// A missing side is treated as null, so creation diffs list every field.
pub fn diff<T: Serialize>(before: Option<&T>, after: Option<&T>) -> Result<Diff> {
    let before = to_object(before)?;
    let after = to_object(after)?;
    let mut out = Diff::new();
    for key in before.keys().chain(after.keys()) {
        if out.contains_key(key) {
            continue;
        }
        let from = before.get(key).cloned().unwrap_or(serde_json::Value::Null);
        let to = after.get(key).cloned().unwrap_or(serde_json::Value::Null);
        if from != to {
            out.insert(key.clone(), FieldChange { from, to });
        }
    }
    Ok(out)
}

fn to_object<T: Serialize>(value: Option<&T>) -> Result<serde_json::Map<String, serde_json::Value>> {
    match value.map(serde_json::to_value).transpose()? {
        Some(serde_json::Value::Object(map)) => Ok(map),
        _ => Ok(serde_json::Map::new()),
    }
}

/// Receiver of audit entries.
pub trait AuditSink {
    fn record(&mut self, entry: AuditEntry) -> Result<()>;
    /// Latest entries, oldest first.
    fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>>;
}

/// Bounded in-memory log; the oldest entries fall off past `max_entries`.
#[derive(Debug, Clone)]
pub struct AuditLog {
    max_entries: usize,
    entries: VecDeque<AuditEntry>,
}

impl AuditLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            entries: VecDeque::new(),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl AuditSink for AuditLog {
    fn record(&mut self, entry: AuditEntry) -> Result<()> {
        self.entries.push_back(entry);
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let skip = self.entries.len().saturating_sub(limit);
        Ok(self.entries.iter().skip(skip).cloned().collect())
    }
}

/// JSONL audit file under `.trellis/audit.jsonl`, capped like [`AuditLog`].
///
/// Entries are appended until the file holds `max_entries`; past that each
/// record rewrites the file with the newest window.
#[derive(Debug, Clone)]
pub struct FileAuditSink {
    storage: Storage,
    max_entries: usize,
}

impl FileAuditSink {
    pub fn new(storage: Storage, max_entries: usize) -> Self {
        Self {
            storage,
            max_entries: max_entries.max(1),
        }
    }
}

impl AuditSink for FileAuditSink {
    fn record(&mut self, entry: AuditEntry) -> Result<()> {
        let _lock = FileLock::acquire(self.storage.audit_lock_file(), DEFAULT_LOCK_TIMEOUT_MS)?;
        let path = self.storage.audit_file();
        let mut entries: Vec<AuditEntry> = self.storage.read_jsonl(&path)?;
        if entries.len() < self.max_entries {
            return self.storage.append_jsonl(&path, &entry);
        }
        let skip = entries.len() + 1 - self.max_entries;
        let mut entries = entries.split_off(skip);
        entries.push(entry);
        debug!(dropped = skip, "audit file compacted");
        self.storage.write_jsonl(&path, &entries)
    }

    fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let entries: Vec<AuditEntry> = self.storage.read_jsonl(&self.storage.audit_file())?;
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.into_iter().skip(skip).collect())
    }
}
