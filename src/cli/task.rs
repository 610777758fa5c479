//! trellis task command implementations.

use serde::Serialize;

use crate::cli::{open_reader, open_writer, Globals, TaskCommands};
use crate::error::Result;
use crate::model::{Task, TaskStatus};
use crate::output::{emit_success, HumanOutput};
use crate::tracker::TaskQuery;

#[derive(Serialize)]
struct TaskListOutput {
    total: usize,
    tasks: Vec<Task>,
}

#[derive(Serialize)]
struct TaskChangeOutput {
    #[serde(flatten)]
    task: Task,
    changed: bool,
}

pub fn run(cmd: TaskCommands, globals: &Globals) -> Result<()> {
    match cmd {
        TaskCommands::Create {
            project,
            title,
            phase,
        } => {
            let mut ctx = open_writer(globals)?;
            let task = ctx
                .tracker
                .create_task(&ctx.actor, &project, &title, phase.as_deref())?;
            let mut human = task_human("Task created", &task);
            human.push_next_step(format!(
                "trellis task transition {} in_progress -r \"<why>\" --expected-version {}",
                task.id, task.version
            ));
            emit_success(globals.output(), "task create", &task, Some(&human))
        }
        TaskCommands::List {
            project,
            phase,
            status,
            deleted,
            ordered,
        } => {
            let status = status.as_deref().map(str::parse::<TaskStatus>).transpose()?;
            let ctx = open_reader(globals)?;
            let tasks = ctx.tracker.list_tasks(&TaskQuery {
                project_id: project,
                phase_id: phase,
                status,
                include_deleted: deleted,
                ordered,
            })?;

            let mut human = HumanOutput::new("Tasks");
            human.push_summary("Total", tasks.len().to_string());
            for task in &tasks {
                human.push_detail(task_line(task));
            }
            let output = TaskListOutput {
                total: tasks.len(),
                tasks,
            };
            emit_success(globals.output(), "task list", &output, Some(&human))
        }
        TaskCommands::Show { id } => {
            let ctx = open_reader(globals)?;
            let task = ctx.tracker.get_task(&id)?;
            let mut human = task_human(format!("Task {}", task.id), &task);
            for entry in &task.rationale_log {
                let mut line = format!(
                    "{} {} -> {}: {}",
                    entry.at.to_rfc3339(),
                    entry.actor,
                    entry.status,
                    entry.rationale
                );
                if let Some(confidence) = entry.confidence {
                    line.push_str(&format!(" (confidence {confidence:.2})"));
                }
                human.push_detail(line);
            }
            emit_success(globals.output(), "task show", &task, Some(&human))
        }
        TaskCommands::Move {
            id,
            phase,
            priority,
        } => {
            let mut ctx = open_writer(globals)?;
            let task = ctx.tracker.move_task(&ctx.actor, &id, &phase, priority)?;
            let human = task_human("Task moved", &task);
            emit_success(globals.output(), "task move", &task, Some(&human))
        }
        TaskCommands::Transition {
            id,
            status,
            rationale,
            expected_version,
            confidence,
        } => {
            let to: TaskStatus = status.parse()?;
            let mut ctx = open_writer(globals)?;
            let task = ctx.tracker.transition_task(
                &ctx.actor,
                &id,
                to,
                &rationale,
                expected_version,
                confidence,
            )?;
            let mut human = task_human(format!("Task {}", task.status), &task);
            if task.status == TaskStatus::InProgress {
                human.push_next_step(format!(
                    "trellis task transition {} done -r \"<why>\" --expected-version {}",
                    task.id, task.version
                ));
            }
            emit_success(globals.output(), "task transition", &task, Some(&human))
        }
        TaskCommands::Delete { id } => {
            let mut ctx = open_writer(globals)?;
            let (task, changed) = ctx.tracker.delete_task(&ctx.actor, &id)?;
            emit_change(globals, "task delete", "Task deleted", task, changed)
        }
        TaskCommands::Restore { id } => {
            let mut ctx = open_writer(globals)?;
            let (task, changed) = ctx.tracker.restore_task(&ctx.actor, &id)?;
            emit_change(globals, "task restore", "Task restored", task, changed)
        }
    }
}

fn emit_change(
    globals: &Globals,
    command: &str,
    header: &str,
    task: Task,
    changed: bool,
) -> Result<()> {
    let mut human = task_human(header, &task);
    if !changed {
        human.push_warning("nothing to do".to_string());
    }
    emit_success(
        globals.output(),
        command,
        &TaskChangeOutput { task, changed },
        Some(&human),
    )
}

fn task_line(task: &Task) -> String {
    let mut line = format!("[{}] {} {}", task.status, task.id, task.title);
    if let Some(phase) = &task.phase_id {
        line.push_str(&format!(" (phase: {phase}"));
        if let Some(priority) = task.priority {
            line.push_str(&format!(", priority: {priority}"));
        }
        line.push(')');
    }
    if task.deleted_at.is_some() {
        line.push_str(" [deleted]");
    }
    line
}

fn task_human(header: impl Into<String>, task: &Task) -> HumanOutput {
    let mut human = HumanOutput::new(header);
    human.push_summary("ID", task.id.clone());
    human.push_summary("Title", task.title.clone());
    human.push_summary("Project", task.project_id.clone());
    human.push_summary("Phase", task.phase_id.clone().unwrap_or_else(|| "none".to_string()));
    if let Some(priority) = task.priority {
        human.push_summary("Priority", priority.to_string());
    }
    human.push_summary("Status", task.status.to_string());
    human.push_summary("Version", task.version.to_string());
    if !task.assignees.is_empty() {
        human.push_summary("Assignees", task.assignees.join(", "));
    }
    human
}
