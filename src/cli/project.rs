//! trellis project and status command implementations.

use serde::Serialize;

use crate::cli::{open_reader, open_writer, Globals, ProjectCommands};
use crate::error::Result;
use crate::model::Project;
use crate::output::{emit_success, HumanOutput};
use crate::status::ProjectStatus;
use crate::tracker::NewProject;

#[derive(Serialize)]
struct ProjectListOutput {
    total: usize,
    projects: Vec<Project>,
}

pub fn run(cmd: ProjectCommands, globals: &Globals) -> Result<()> {
    match cmd {
        ProjectCommands::Create {
            name,
            parent,
            id,
            description,
        } => {
            let mut ctx = open_writer(globals)?;
            let project = ctx.tracker.create_project_with(
                &ctx.actor,
                NewProject {
                    id,
                    name,
                    description,
                    parent_id: parent,
                },
            )?;
            let mut human = project_human("Project created", &project);
            human.push_next_step(format!("trellis phase create {} <name>", project.id));
            emit_success(globals.output(), "project create", &project, Some(&human))
        }
        ProjectCommands::List { archived } => {
            let ctx = open_reader(globals)?;
            let projects = ctx.tracker.list_projects(archived)?;
            emit_list(globals, "project list", "Projects", projects)
        }
        ProjectCommands::Show { id } => {
            let ctx = open_reader(globals)?;
            let project = ctx.tracker.get_project(&id)?;
            let human = project_human(format!("Project {}", project.id), &project);
            emit_success(globals.output(), "project show", &project, Some(&human))
        }
        ProjectCommands::Children { id } => {
            let ctx = open_reader(globals)?;
            let children = ctx.tracker.list_children(&id)?;
            emit_list(globals, "project children", &format!("Children of {id}"), children)
        }
        ProjectCommands::SetParent { id, parent } => {
            let mut ctx = open_writer(globals)?;
            let project = ctx
                .tracker
                .set_project_parent(&ctx.actor, &id, parent.as_deref())?;
            let human = project_human("Project parent updated", &project);
            emit_success(globals.output(), "project set-parent", &project, Some(&human))
        }
        ProjectCommands::Archive { id } => {
            let mut ctx = open_writer(globals)?;
            let project = ctx.tracker.archive_project(&ctx.actor, &id)?;
            let human = project_human("Project archived", &project);
            emit_success(globals.output(), "project archive", &project, Some(&human))
        }
        ProjectCommands::Restore { id } => {
            let mut ctx = open_writer(globals)?;
            let project = ctx.tracker.restore_project(&ctx.actor, &id)?;
            let human = project_human("Project restored", &project);
            emit_success(globals.output(), "project restore", &project, Some(&human))
        }
    }
}

pub fn run_status(project: Option<&str>, rollup: bool, globals: &Globals) -> Result<()> {
    let mut ctx = open_reader(globals)?;
    let project_id = project.unwrap_or(ctx.tracker.root_id()).to_string();

    if rollup {
        let status = ctx.tracker.compute_aggregated_status(&project_id)?;
        let mut human = status_human(&status.status);
        human.push_summary(
            "rollup",
            format!(
                "{}/{} done ({:.2}%) across {} child project(s)",
                status.rollup.aggregated.done,
                status.rollup.aggregated.tasks,
                status.rollup.aggregated.completion_pct,
                status.rollup.child_count
            ),
        );
        for child in &status.rollup.children {
            human.push_detail(format!(
                "child {}: {}/{} done ({:.2}%)",
                child.project_id, child.totals.done, child.totals.tasks, child.completion_pct
            ));
        }
        return emit_success(globals.output(), "status", &status, Some(&human));
    }

    let status = ctx.tracker.compute_status(&project_id)?;
    let human = status_human(&status);
    emit_success(globals.output(), "status", &status, Some(&human))
}

fn status_human(status: &ProjectStatus) -> HumanOutput {
    let mut human = HumanOutput::new(format!("Status of {}", status.project_id));
    human.push_summary(
        "completion",
        format!(
            "{}/{} done ({:.2}%)",
            status.totals.done, status.totals.tasks, status.completion_pct
        ),
    );
    human.push_summary("active tasks", status.active_task_count.to_string());
    if let Some(phase) = &status.active_phase {
        human.push_summary("active phase", format!("{} ({})", phase.name, phase.id));
    }
    match &status.next_priority_task {
        Some(task) => {
            human.push_summary("next", format!("{} {}", task.id, task.title));
        }
        None => human.push_summary("next", "nothing open"),
    }
    human
}

fn project_human(header: impl Into<String>, project: &Project) -> HumanOutput {
    let mut human = HumanOutput::new(header);
    human.push_summary("id", project.id.clone());
    human.push_summary("name", project.name.clone());
    if let Some(parent) = &project.parent_id {
        human.push_summary("parent", parent.clone());
    }
    if let Some(description) = &project.description {
        human.push_summary("description", description.clone());
    }
    if project.archived_at.is_some() {
        human.push_summary("archived", "yes");
    }
    human
}

fn emit_list(globals: &Globals, command: &str, header: &str, projects: Vec<Project>) -> Result<()> {
    let mut human = HumanOutput::new(header);
    human.push_summary("Total", projects.len().to_string());
    for project in &projects {
        let mut line = format!("{} {}", project.id, project.name);
        if let Some(parent) = &project.parent_id {
            line.push_str(&format!(" (parent: {parent})"));
        }
        if project.archived_at.is_some() {
            line.push_str(" [archived]");
        }
        human.push_detail(line);
    }
    let output = ProjectListOutput {
        total: projects.len(),
        projects,
    };
    emit_success(globals.output(), command, &output, Some(&human))
}
