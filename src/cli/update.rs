//! trellis update command implementations.

use serde::Serialize;

use crate::cli::{open_reader, open_writer, Globals, UpdateCommands};
use crate::error::Result;
use crate::model::StatusUpdate;
use crate::output::{emit_success, HumanOutput};

#[derive(Serialize)]
struct UpdateListOutput {
    total: usize,
    updates: Vec<StatusUpdate>,
}

pub fn run(cmd: UpdateCommands, globals: &Globals) -> Result<()> {
    match cmd {
        UpdateCommands::Post {
            project,
            message,
            task,
        } => {
            let mut ctx = open_writer(globals)?;
            let update =
                ctx.tracker
                    .post_status_update(&ctx.actor, &project, task.as_deref(), &message)?;

            let mut human = HumanOutput::new("Status update posted");
            human.push_summary("ID", update.id.clone());
            human.push_summary("Project", update.project_id.clone());
            if let Some(task_id) = &update.task_id {
                human.push_summary("Task", task_id.clone());
            }
            emit_success(globals.output(), "update post", &update, Some(&human))
        }
        UpdateCommands::List {
            project,
            task,
            limit,
        } => {
            let ctx = open_reader(globals)?;
            let updates =
                ctx.tracker
                    .list_status_updates(project.as_deref(), task.as_deref(), limit)?;

            let mut human = HumanOutput::new("Status updates");
            human.push_summary("Shown", updates.len().to_string());
            for update in &updates {
                let about = update
                    .task_id
                    .as_deref()
                    .map(|id| format!(" ({id})"))
                    .unwrap_or_default();
                human.push_detail(format!(
                    "{} {}{}: {}",
                    update.created_at.to_rfc3339(),
                    update.actor,
                    about,
                    update.message
                ));
            }
            let output = UpdateListOutput {
                total: updates.len(),
                updates,
            };
            emit_success(globals.output(), "update list", &output, Some(&human))
        }
    }
}
