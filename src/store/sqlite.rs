//! Relational storage driver on an embedded SQLite database.
//!
//! List-valued fields are stored as JSON text, timestamps as RFC 3339 with
//! nanosecond precision so that creation order survives a round trip.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::model::{Bug, DesignNote, Phase, Project, StatusUpdate, Task};

use super::{EntityStore, TaskFilter, UpdateFilter, View};

const PROJECT_COLUMNS: &str = "id, name, description, parent_id, created_at, archived_at";
const PHASE_COLUMNS: &str = "id, project_id, name, order_index, created_at, archived_at";
const TASK_COLUMNS: &str = "id, project_id, phase_id, priority, title, status, version, \
     assignees, rationale_log, created_at, updated_at, deleted_at";
const BUG_COLUMNS: &str = "id, project_id, title, severity, status, linked_task_ids, \
     repro_steps, proposed_fix, version, created_at, updated_at, deleted_at";
const NOTE_COLUMNS: &str = "id, project_id, title, context, decision, consequences, \
     superseded_by, actor, created_at, deleted_at";
const UPDATE_COLUMNS: &str = "id, project_id, task_id, actor, message, created_at";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a database file and make sure the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                parent_id TEXT,
                created_at TEXT NOT NULL,
                archived_at TEXT
            );

            CREATE TABLE IF NOT EXISTS phases (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                name TEXT NOT NULL,
                order_index INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                archived_at TEXT
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                phase_id TEXT,
                priority INTEGER,
                title TEXT NOT NULL,
                status TEXT NOT NULL,
                version INTEGER NOT NULL,
                assignees TEXT NOT NULL DEFAULT '[]',
                rationale_log TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS bugs (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                title TEXT NOT NULL,
                severity TEXT NOT NULL,
                status TEXT NOT NULL,
                linked_task_ids TEXT NOT NULL DEFAULT '[]',
                repro_steps TEXT NOT NULL DEFAULT '[]',
                proposed_fix TEXT,
                version INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS design_notes (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                title TEXT NOT NULL,
                context TEXT NOT NULL,
                decision TEXT NOT NULL,
                consequences TEXT NOT NULL,
                superseded_by TEXT,
                actor TEXT NOT NULL,
                created_at TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS status_updates (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                task_id TEXT,
                actor TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_projects_parent ON projects(parent_id);
            CREATE INDEX IF NOT EXISTS idx_phases_project ON phases(project_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_phase ON tasks(phase_id);
            CREATE INDEX IF NOT EXISTS idx_bugs_project ON bugs(project_id);
            CREATE INDEX IF NOT EXISTS idx_notes_project ON design_notes(project_id);
            CREATE INDEX IF NOT EXISTS idx_updates_project ON status_updates(project_id);
            "#,
        )?;
        Ok(())
    }

    fn query_all<T>(
        &self,
        sql: &str,
        args: &[String],
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), map)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn query_one<T>(
        &self,
        sql: &str,
        id: &str,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Option<T>> {
        Ok(self.conn.query_row(sql, params![id], map).optional()?)
    }
}

/// `AND archived_at IS NULL`-style clause for the given view.
fn view_clause(view: View, column: &str) -> String {
    match view {
        View::Active => format!(" AND {column} IS NULL"),
        View::All => String::new(),
    }
}

// =============================================================================
// Column encoding
// =============================================================================

fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn opt_ts(value: Option<&DateTime<Utc>>) -> Option<String> {
    value.map(ts)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| conversion_error(idx, err))
}

fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|value| Some(value.with_timezone(&Utc)))
            .map_err(|err| conversion_error(idx, err)),
        None => Ok(None),
    }
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|err| conversion_error(idx, err))
}

fn parsed_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = crate::error::Error>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|err| conversion_error(idx, err))
}

fn project_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        parent_id: row.get(3)?,
        created_at: ts_col(row, 4)?,
        archived_at: opt_ts_col(row, 5)?,
    })
}

fn phase_row(row: &Row<'_>) -> rusqlite::Result<Phase> {
    Ok(Phase {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        order_index: row.get(3)?,
        created_at: ts_col(row, 4)?,
        archived_at: opt_ts_col(row, 5)?,
    })
}

fn task_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        project_id: row.get(1)?,
        phase_id: row.get(2)?,
        priority: row.get(3)?,
        title: row.get(4)?,
        status: parsed_col(row, 5)?,
        version: row.get(6)?,
        assignees: json_col(row, 7)?,
        rationale_log: json_col(row, 8)?,
        created_at: ts_col(row, 9)?,
        updated_at: ts_col(row, 10)?,
        deleted_at: opt_ts_col(row, 11)?,
    })
}

fn bug_row(row: &Row<'_>) -> rusqlite::Result<Bug> {
    Ok(Bug {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        severity: parsed_col(row, 3)?,
        status: parsed_col(row, 4)?,
        linked_task_ids: json_col(row, 5)?,
        repro_steps: json_col(row, 6)?,
        proposed_fix: row.get(7)?,
        version: row.get(8)?,
        created_at: ts_col(row, 9)?,
        updated_at: ts_col(row, 10)?,
        deleted_at: opt_ts_col(row, 11)?,
    })
}

fn note_row(row: &Row<'_>) -> rusqlite::Result<DesignNote> {
    Ok(DesignNote {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        context: row.get(3)?,
        decision: row.get(4)?,
        consequences: row.get(5)?,
        superseded_by: row.get(6)?,
        actor: row.get(7)?,
        created_at: ts_col(row, 8)?,
        deleted_at: opt_ts_col(row, 9)?,
    })
}

fn update_row(row: &Row<'_>) -> rusqlite::Result<StatusUpdate> {
    Ok(StatusUpdate {
        id: row.get(0)?,
        project_id: row.get(1)?,
        task_id: row.get(2)?,
        actor: row.get(3)?,
        message: row.get(4)?,
        created_at: ts_col(row, 5)?,
    })
}

// =============================================================================
// EntityStore
// =============================================================================

impl EntityStore for SqliteStore {
    fn get_project(&self, id: &str, view: View) -> Result<Option<Project>> {
        let sql = format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1{}",
            view_clause(view, "archived_at")
        );
        self.query_one(&sql, id, project_row)
    }

    fn list_projects(&self, view: View) -> Result<Vec<Project>> {
        let sql = format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE 1 = 1{} ORDER BY created_at, id",
            view_clause(view, "archived_at")
        );
        self.query_all(&sql, &[], project_row)
    }

    fn list_children(&self, parent_id: &str, view: View) -> Result<Vec<Project>> {
        let sql = format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE parent_id = ?1{} ORDER BY created_at, id",
            view_clause(view, "archived_at")
        );
        self.query_all(&sql, &[parent_id.to_string()], project_row)
    }

    fn put_project(&mut self, project: &Project) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO projects (id, name, description, parent_id, created_at, archived_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                project.id,
                project.name,
                project.description,
                project.parent_id,
                ts(&project.created_at),
                opt_ts(project.archived_at.as_ref()),
            ],
        )?;
        Ok(())
    }

    fn get_phase(&self, id: &str, view: View) -> Result<Option<Phase>> {
        let sql = format!(
            "SELECT {PHASE_COLUMNS} FROM phases WHERE id = ?1{}",
            view_clause(view, "archived_at")
        );
        self.query_one(&sql, id, phase_row)
    }

    fn list_phases(&self, project_id: &str, view: View) -> Result<Vec<Phase>> {
        let sql = format!(
            "SELECT {PHASE_COLUMNS} FROM phases WHERE project_id = ?1{} \
             ORDER BY order_index, created_at, id",
            view_clause(view, "archived_at")
        );
        self.query_all(&sql, &[project_id.to_string()], phase_row)
    }

    fn put_phases(&mut self, phases: &[Phase]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO phases (id, project_id, name, order_index, created_at, archived_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for phase in phases {
                stmt.execute(params![
                    phase.id,
                    phase.project_id,
                    phase.name,
                    phase.order_index,
                    ts(&phase.created_at),
                    opt_ts(phase.archived_at.as_ref()),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get_task(&self, id: &str, view: View) -> Result<Option<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1{}",
            view_clause(view, "deleted_at")
        );
        self.query_one(&sql, id, task_row)
    }

    fn list_tasks(&self, filter: &TaskFilter, view: View) -> Result<Vec<Task>> {
        let mut sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE 1 = 1");
        let mut args = Vec::new();
        if let Some(project_id) = &filter.project_id {
            args.push(project_id.clone());
            sql.push_str(&format!(" AND project_id = ?{}", args.len()));
        }
        if let Some(phase_id) = &filter.phase_id {
            args.push(phase_id.clone());
            sql.push_str(&format!(" AND phase_id = ?{}", args.len()));
        }
        if let Some(status) = filter.status {
            args.push(status.as_str().to_string());
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        sql.push_str(&view_clause(view, "deleted_at"));
        sql.push_str(" ORDER BY created_at, id");
        self.query_all(&sql, &args, task_row)
    }

    fn put_task(&mut self, task: &Task) -> Result<()> {
        let assignees = to_json(&task.assignees)?;
        let rationale_log = to_json(&task.rationale_log)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO tasks (id, project_id, phase_id, priority, title, status, version,
                 assignees, rationale_log, created_at, updated_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                task.id,
                task.project_id,
                task.phase_id,
                task.priority,
                task.title,
                task.status.as_str(),
                task.version,
                assignees,
                rationale_log,
                ts(&task.created_at),
                ts(&task.updated_at),
                opt_ts(task.deleted_at.as_ref()),
            ],
        )?;
        Ok(())
    }

    fn get_bug(&self, id: &str, view: View) -> Result<Option<Bug>> {
        let sql = format!(
            "SELECT {BUG_COLUMNS} FROM bugs WHERE id = ?1{}",
            view_clause(view, "deleted_at")
        );
        self.query_one(&sql, id, bug_row)
    }

    fn list_bugs(&self, project_id: Option<&str>, view: View) -> Result<Vec<Bug>> {
        let mut sql = format!("SELECT {BUG_COLUMNS} FROM bugs WHERE 1 = 1");
        let mut args = Vec::new();
        if let Some(project_id) = project_id {
            args.push(project_id.to_string());
            sql.push_str(" AND project_id = ?1");
        }
        sql.push_str(&view_clause(view, "deleted_at"));
        sql.push_str(" ORDER BY created_at, id");
        self.query_all(&sql, &args, bug_row)
    }

    fn put_bug(&mut self, bug: &Bug) -> Result<()> {
        let linked = to_json(&bug.linked_task_ids)?;
        let repro = to_json(&bug.repro_steps)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO bugs (id, project_id, title, severity, status, linked_task_ids,
                 repro_steps, proposed_fix, version, created_at, updated_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                bug.id,
                bug.project_id,
                bug.title,
                bug.severity.as_str(),
                bug.status.as_str(),
                linked,
                repro,
                bug.proposed_fix,
                bug.version,
                ts(&bug.created_at),
                ts(&bug.updated_at),
                opt_ts(bug.deleted_at.as_ref()),
            ],
        )?;
        Ok(())
    }

    fn get_note(&self, id: &str, view: View) -> Result<Option<DesignNote>> {
        let sql = format!(
            "SELECT {NOTE_COLUMNS} FROM design_notes WHERE id = ?1{}",
            view_clause(view, "deleted_at")
        );
        self.query_one(&sql, id, note_row)
    }

    fn list_notes(&self, project_id: Option<&str>, view: View) -> Result<Vec<DesignNote>> {
        let mut sql = format!("SELECT {NOTE_COLUMNS} FROM design_notes WHERE 1 = 1");
        let mut args = Vec::new();
        if let Some(project_id) = project_id {
            args.push(project_id.to_string());
            sql.push_str(" AND project_id = ?1");
        }
        sql.push_str(&view_clause(view, "deleted_at"));
        sql.push_str(" ORDER BY created_at, id");
        self.query_all(&sql, &args, note_row)
    }

    fn put_note(&mut self, note: &DesignNote) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO design_notes (id, project_id, title, context, decision,
                 consequences, superseded_by, actor, created_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                note.id,
                note.project_id,
                note.title,
                note.context,
                note.decision,
                note.consequences,
                note.superseded_by,
                note.actor,
                ts(&note.created_at),
                opt_ts(note.deleted_at.as_ref()),
            ],
        )?;
        Ok(())
    }

    fn list_status_updates(&self, filter: &UpdateFilter) -> Result<Vec<StatusUpdate>> {
        let mut sql = format!("SELECT {UPDATE_COLUMNS} FROM status_updates WHERE 1 = 1");
        let mut args = Vec::new();
        if let Some(project_id) = &filter.project_id {
            args.push(project_id.clone());
            sql.push_str(&format!(" AND project_id = ?{}", args.len()));
        }
        if let Some(task_id) = &filter.task_id {
            args.push(task_id.clone());
            sql.push_str(&format!(" AND task_id = ?{}", args.len()));
        }
        sql.push_str(" ORDER BY created_at, id");
        self.query_all(&sql, &args, update_row)
    }

    fn put_status_update(&mut self, update: &StatusUpdate) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO status_updates (id, project_id, task_id, actor, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                update.id,
                update.project_id,
                update.task_id,
                update.actor,
                update.message,
                ts(&update.created_at),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RationaleEntry, TaskStatus};

    #[test]
    fn task_round_trips_list_fields() {
        let mut store = SqliteStore::open_in_memory().expect("open");
        let mut task = Task::new("prj-a", "ship it");
        task.assignees.push("agent-1".to_string());
        task.rationale_log.push(RationaleEntry {
            at: Utc::now(),
            actor: "agent-1".to_string(),
            status: TaskStatus::InProgress,
            rationale: "picked up".to_string(),
            confidence: Some(0.8),
        });
        store.put_task(&task).expect("put");

        let loaded = store.get_task(&task.id, View::Active).expect("get").expect("task");
        assert_eq!(loaded, task);
    }

    #[test]
    fn phases_list_in_order_index_order() {
        let mut store = SqliteStore::open_in_memory().expect("open");
        let now = Utc::now();
        let phases: Vec<Phase> = [("ph-b", 1), ("ph-a", 0), ("ph-c", 2)]
            .iter()
            .map(|(id, idx)| Phase {
                id: id.to_string(),
                project_id: "prj-a".to_string(),
                name: id.to_string(),
                order_index: *idx,
                created_at: now,
                archived_at: None,
            })
            .collect();
        store.put_phases(&phases).expect("put");

        let ids: Vec<String> = store
            .list_phases("prj-a", View::Active)
            .expect("list")
            .into_iter()
            .map(|phase| phase.id)
            .collect();
        assert_eq!(ids, vec!["ph-a", "ph-b", "ph-c"]);
    }

    #[test]
    fn reopening_file_preserves_records() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("trellis.db");
        let project = Project::new("prj-a", "A", Some("default".to_string()));
        {
            let mut store = SqliteStore::open(&path).expect("open");
            store.put_project(&project).expect("put");
        }
        let store = SqliteStore::open(&path).expect("reopen");
        let children = store.list_children("default", View::Active).expect("children");
        assert_eq!(children, vec![project]);
    }

    #[test]
    fn deleted_notes_only_visible_in_all_view() {
        let mut store = SqliteStore::open_in_memory().expect("open");
        let note = DesignNote {
            id: "dn-1".to_string(),
            project_id: "prj-a".to_string(),
            title: "Use SQLite".to_string(),
            context: "We need a local relational store".to_string(),
            decision: "Embed SQLite".to_string(),
            consequences: "Single file on disk".to_string(),
            superseded_by: Some("dn-2".to_string()),
            actor: "architect".to_string(),
            created_at: Utc::now(),
            deleted_at: Some(Utc::now()),
        };
        store.put_note(&note).expect("put");

        assert!(store.get_note("dn-1", View::Active).expect("get").is_none());
        assert_eq!(store.get_note("dn-1", View::All).expect("get"), Some(note));
        assert!(store.list_notes(Some("prj-a"), View::Active).expect("list").is_empty());
    }
}
