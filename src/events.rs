//! Change broadcast for live-update consumers.
//!
//! Accepted mutations are published as [`Event`]s to a [`ChangeSink`]. The CLI
//! writes them as JSON lines to stdout or a file (`--events`).

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const EVENT_SCHEMA_VERSION: &str = "trellis.event.v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDestination {
    Stdout,
    File(PathBuf),
}

impl EventDestination {
    /// `-` means stdout; blank means no destination.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        raw.and_then(|value| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return None;
            }
            if trimmed == "-" {
                return Some(EventDestination::Stdout);
            }
            Some(EventDestination::File(PathBuf::from(trimmed)))
        })
    }

    pub fn open(&self) -> Result<EventSink> {
        match self {
            EventDestination::Stdout => Ok(EventSink::stdout()),
            EventDestination::File(path) => EventSink::file(path),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventKind {
    #[serde(rename = "project.created")]
    ProjectCreated,
    #[serde(rename = "project.updated")]
    ProjectUpdated,
    #[serde(rename = "project.archived")]
    ProjectArchived,
    #[serde(rename = "project.restored")]
    ProjectRestored,
    #[serde(rename = "phase.created")]
    PhaseCreated,
    #[serde(rename = "phase.reordered")]
    PhaseReordered,
    #[serde(rename = "phase.archived")]
    PhaseArchived,
    #[serde(rename = "phase.restored")]
    PhaseRestored,
    #[serde(rename = "task.created")]
    TaskCreated,
    #[serde(rename = "task.updated")]
    TaskUpdated,
    #[serde(rename = "task.moved")]
    TaskMoved,
    #[serde(rename = "task.deleted")]
    TaskDeleted,
    #[serde(rename = "task.restored")]
    TaskRestored,
    #[serde(rename = "bug.created")]
    BugCreated,
    #[serde(rename = "bug.updated")]
    BugUpdated,
    #[serde(rename = "bug.deleted")]
    BugDeleted,
    #[serde(rename = "bug.restored")]
    BugRestored,
    #[serde(rename = "design_note.created")]
    DesignNoteCreated,
    #[serde(rename = "design_note.superseded")]
    DesignNoteSuperseded,
    #[serde(rename = "design_note.deleted")]
    DesignNoteDeleted,
    #[serde(rename = "design_note.restored")]
    DesignNoteRestored,
    #[serde(rename = "status_update.created")]
    StatusUpdateCreated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub schema_version: String,
    pub event: EventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Event {
    pub fn new(event: EventKind, actor: Option<String>) -> Self {
        Self {
            schema_version: EVENT_SCHEMA_VERSION.to_string(),
            event,
            timestamp: Utc::now(),
            actor,
            data: None,
        }
    }

    pub fn with_data<T: Serialize>(mut self, data: T) -> Result<Self> {
        self.data = Some(serde_json::to_value(data)?);
        Ok(self)
    }
}

/// Receiver of change events.
pub trait ChangeSink {
    fn publish(&mut self, event: &Event) -> Result<()>;
}

/// JSONL writer to stdout or an append-only file.
pub struct EventSink {
    writer: Box<dyn Write + Send>,
}

impl EventSink {
    pub fn stdout() -> Self {
        Self {
            writer: Box::new(std::io::stdout()),
        }
    }

    pub fn file(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            writer: Box::new(file),
        })
    }
}

impl ChangeSink for EventSink {
    fn publish(&mut self, event: &Event) -> Result<()> {
        let serialized = serde_json::to_vec(event)?;
        self.writer.write_all(&serialized)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush().map_err(Error::Io)?;
        Ok(())
    }
}

/// In-process sink that keeps every event; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct EventBuffer {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|event| event.event).collect()
    }
}

impl ChangeSink for EventBuffer {
    fn publish(&mut self, event: &Event) -> Result<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| Error::OperationFailed("event buffer lock poisoned".to_string()))?;
        events.push(event.clone());
        Ok(())
    }
}
