//! trellis bug command implementations.

use serde::Serialize;

use crate::cli::{open_reader, open_writer, BugCommands, Globals};
use crate::error::{Error, Result};
use crate::model::{Bug, BugStatus, BugUpdate, NewBug, Severity};
use crate::output::{emit_success, HumanOutput};

#[derive(Serialize)]
struct BugListOutput {
    total: usize,
    bugs: Vec<Bug>,
}

#[derive(Serialize)]
struct BugChangeOutput {
    #[serde(flatten)]
    bug: Bug,
    changed: bool,
}

pub fn run(cmd: BugCommands, globals: &Globals) -> Result<()> {
    match cmd {
        BugCommands::Create {
            project,
            title,
            severity,
            links,
            repro_steps,
            fix,
        } => {
            let severity = severity.as_deref().map(str::parse::<Severity>).transpose()?;
            let mut ctx = open_writer(globals)?;
            let bug = ctx.tracker.create_bug(
                &ctx.actor,
                &project,
                NewBug {
                    title,
                    severity,
                    linked_task_ids: links,
                    repro_steps,
                    proposed_fix: fix,
                },
            )?;
            let human = bug_human("Bug filed", &bug);
            emit_success(globals.output(), "bug create", &bug, Some(&human))
        }
        BugCommands::List { project, deleted } => {
            let ctx = open_reader(globals)?;
            let bugs = ctx.tracker.list_bugs(project.as_deref(), deleted)?;

            let mut human = HumanOutput::new("Bugs");
            human.push_summary("Total", bugs.len().to_string());
            for bug in &bugs {
                let mut line = format!("[{}][{}] {} {}", bug.status, bug.severity, bug.id, bug.title);
                if bug.deleted_at.is_some() {
                    line.push_str(" [deleted]");
                }
                human.push_detail(line);
            }
            let output = BugListOutput {
                total: bugs.len(),
                bugs,
            };
            emit_success(globals.output(), "bug list", &output, Some(&human))
        }
        BugCommands::Show { id } => {
            let ctx = open_reader(globals)?;
            let bug = ctx.tracker.get_bug(&id)?;
            let mut human = bug_human(format!("Bug {}", bug.id), &bug);
            for (index, step) in bug.repro_steps.iter().enumerate() {
                human.push_detail(format!("{}. {step}", index + 1));
            }
            emit_success(globals.output(), "bug show", &bug, Some(&human))
        }
        BugCommands::Update {
            id,
            expected_version,
            title,
            severity,
            status,
            links,
            repro_steps,
            fix,
        } => {
            let update = BugUpdate {
                title,
                severity: severity.as_deref().map(str::parse::<Severity>).transpose()?,
                status: status.as_deref().map(str::parse::<BugStatus>).transpose()?,
                linked_task_ids: links,
                repro_steps,
                proposed_fix: fix,
            };
            if update.is_empty() {
                return Err(Error::InvalidArgument(
                    "nothing to update; pass at least one field".to_string(),
                ));
            }
            let mut ctx = open_writer(globals)?;
            let bug = ctx
                .tracker
                .update_bug(&ctx.actor, &id, update, expected_version)?;
            let human = bug_human("Bug updated", &bug);
            emit_success(globals.output(), "bug update", &bug, Some(&human))
        }
        BugCommands::Delete { id } => {
            let mut ctx = open_writer(globals)?;
            let (bug, changed) = ctx.tracker.delete_bug(&ctx.actor, &id)?;
            emit_change(globals, "bug delete", "Bug deleted", bug, changed)
        }
        BugCommands::Restore { id } => {
            let mut ctx = open_writer(globals)?;
            let (bug, changed) = ctx.tracker.restore_bug(&ctx.actor, &id)?;
            emit_change(globals, "bug restore", "Bug restored", bug, changed)
        }
    }
}

fn emit_change(globals: &Globals, command: &str, header: &str, bug: Bug, changed: bool) -> Result<()> {
    let mut human = bug_human(header, &bug);
    if !changed {
        human.push_warning("nothing to do".to_string());
    }
    emit_success(
        globals.output(),
        command,
        &BugChangeOutput { bug, changed },
        Some(&human),
    )
}

fn bug_human(header: impl Into<String>, bug: &Bug) -> HumanOutput {
    let mut human = HumanOutput::new(header);
    human.push_summary("ID", bug.id.clone());
    human.push_summary("Title", bug.title.clone());
    human.push_summary("Project", bug.project_id.clone());
    human.push_summary("Severity", bug.severity.to_string());
    human.push_summary("Status", bug.status.to_string());
    human.push_summary("Version", bug.version.to_string());
    if !bug.linked_task_ids.is_empty() {
        human.push_summary("Linked tasks", bug.linked_task_ids.join(", "));
    }
    if let Some(fix) = &bug.proposed_fix {
        human.push_summary("Proposed fix", fix.clone());
    }
    human
}
