//! trellis phase command implementations.

use serde::Serialize;

use crate::cli::{open_reader, open_writer, Globals, PhaseCommands};
use crate::error::{Error, Result};
use crate::model::Phase;
use crate::output::{emit_success, HumanOutput};

#[derive(Serialize)]
struct PhaseListOutput {
    project_id: String,
    total: usize,
    phases: Vec<Phase>,
}

#[derive(Serialize)]
struct ReorderOutput {
    projects: Vec<String>,
}

pub fn run(cmd: PhaseCommands, globals: &Globals) -> Result<()> {
    match cmd {
        PhaseCommands::Create { project, name } => {
            let mut ctx = open_writer(globals)?;
            let phase = ctx.tracker.create_phase(&ctx.actor, &project, &name)?;
            let human = phase_human("Phase created", &phase);
            emit_success(globals.output(), "phase create", &phase, Some(&human))
        }
        PhaseCommands::List { project, archived } => {
            let ctx = open_reader(globals)?;
            let phases = ctx.tracker.list_phases(&project, archived)?;

            let mut human = HumanOutput::new(format!("Phases of {project}"));
            human.push_summary("Total", phases.len().to_string());
            for phase in &phases {
                let mut line = format!("{:>3} {} {}", phase.order_index, phase.id, phase.name);
                if phase.archived_at.is_some() {
                    line.push_str(" [archived]");
                }
                human.push_detail(line);
            }
            let output = PhaseListOutput {
                project_id: project,
                total: phases.len(),
                phases,
            };
            emit_success(globals.output(), "phase list", &output, Some(&human))
        }
        PhaseCommands::Reorder { entries } => {
            let requests = entries
                .iter()
                .map(|entry| parse_reorder_entry(entry))
                .collect::<Result<Vec<_>>>()?;
            let mut ctx = open_writer(globals)?;
            let projects = ctx.tracker.reorder_phases(&ctx.actor, &requests)?;

            let mut human = HumanOutput::new("Phases reordered");
            if projects.is_empty() {
                human.push_warning("no known phases in request".to_string());
            }
            for project in &projects {
                human.push_detail(format!("project {project} renumbered"));
            }
            emit_success(
                globals.output(),
                "phase reorder",
                &ReorderOutput { projects },
                Some(&human),
            )
        }
        PhaseCommands::Archive { id } => {
            let mut ctx = open_writer(globals)?;
            let phase = ctx.tracker.archive_phase(&ctx.actor, &id)?;
            let human = phase_human("Phase archived", &phase);
            emit_success(globals.output(), "phase archive", &phase, Some(&human))
        }
        PhaseCommands::Restore { id } => {
            let mut ctx = open_writer(globals)?;
            let phase = ctx.tracker.restore_phase(&ctx.actor, &id)?;
            let human = phase_human("Phase restored", &phase);
            emit_success(globals.output(), "phase restore", &phase, Some(&human))
        }
    }
}

/// Parse `PHASE=INDEX`.
fn parse_reorder_entry(entry: &str) -> Result<(String, i64)> {
    let (id, index) = entry.split_once('=').ok_or_else(|| {
        Error::InvalidArgument(format!("expected PHASE=INDEX, got '{entry}'"))
    })?;
    let id = id.trim();
    if id.is_empty() {
        return Err(Error::InvalidArgument(format!("missing phase id in '{entry}'")));
    }
    let index = index
        .trim()
        .parse::<i64>()
        .map_err(|_| Error::InvalidArgument(format!("invalid index in '{entry}'")))?;
    Ok((id.to_string(), index))
}

fn phase_human(header: &str, phase: &Phase) -> HumanOutput {
    let mut human = HumanOutput::new(header);
    human.push_summary("id", phase.id.clone());
    human.push_summary("project", phase.project_id.clone());
    human.push_summary("name", phase.name.clone());
    human.push_summary("index", phase.order_index.to_string());
    human
}
