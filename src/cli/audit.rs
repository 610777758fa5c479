//! trellis audit and backfill command implementations.

use serde::Serialize;

use crate::audit::AuditEntry;
use crate::cli::{open_reader, open_writer, Globals};
use crate::error::Result;
use crate::output::{emit_success, HumanOutput};

#[derive(Serialize)]
struct AuditOutput {
    total: usize,
    entries: Vec<AuditEntry>,
}

pub fn run_log(limit: usize, globals: &Globals) -> Result<()> {
    let ctx = open_reader(globals)?;
    let entries = ctx.tracker.recent_audit(limit)?;

    let mut human = HumanOutput::new("Audit log");
    human.push_summary("Shown", entries.len().to_string());
    human.push_summary("File", ctx.storage.audit_file().display().to_string());
    for entry in &entries {
        let fields: Vec<&str> = entry.diff.keys().map(String::as_str).collect();
        let mut line = format!(
            "{} {} {} {} {}",
            entry.at.to_rfc3339(),
            entry.actor,
            entry.action,
            entry.entity,
            entry.entity_id
        );
        if !fields.is_empty() {
            line.push_str(&format!(" [{}]", fields.join(", ")));
        }
        human.push_detail(line);
    }

    let output = AuditOutput {
        total: entries.len(),
        entries,
    };
    emit_success(globals.output(), "audit", &output, Some(&human))
}

pub fn run_backfill(globals: &Globals) -> Result<()> {
    let mut ctx = open_writer(globals)?;
    let report = ctx.tracker.backfill_phases(&ctx.actor)?;

    let header = if report.tasks.is_empty() {
        "trellis backfill: nothing to do"
    } else {
        "trellis backfill: tasks attached"
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("tasks", report.tasks.len().to_string());
    human.push_summary("phases created", report.phases_created.len().to_string());
    for id in &report.tasks {
        human.push_detail(id.clone());
    }

    emit_success(globals.output(), "backfill", &report, Some(&human))
}
