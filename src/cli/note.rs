//! trellis note command implementations.

use serde::Serialize;

use crate::cli::{open_reader, open_writer, Globals, NoteCommands};
use crate::error::Result;
use crate::model::{DesignNote, NewDesignNote};
use crate::output::{emit_success, HumanOutput};

#[derive(Serialize)]
struct NoteListOutput {
    total: usize,
    notes: Vec<DesignNote>,
}

#[derive(Serialize)]
struct NoteChangeOutput {
    #[serde(flatten)]
    note: DesignNote,
    changed: bool,
}

pub fn run(cmd: NoteCommands, globals: &Globals) -> Result<()> {
    match cmd {
        NoteCommands::Create {
            project,
            title,
            context,
            decision,
            consequences,
        } => {
            let mut ctx = open_writer(globals)?;
            let note = ctx.tracker.create_note(
                &ctx.actor,
                &project,
                NewDesignNote {
                    title,
                    context,
                    decision,
                    consequences,
                },
            )?;
            let human = note_human("Design note recorded", &note);
            emit_success(globals.output(), "note create", &note, Some(&human))
        }
        NoteCommands::List {
            project,
            deleted,
            limit,
        } => {
            let ctx = open_reader(globals)?;
            let notes = ctx.tracker.list_notes(project.as_deref(), deleted, limit)?;

            let mut human = HumanOutput::new("Design notes");
            human.push_summary("Shown", notes.len().to_string());
            for note in &notes {
                let mut line = format!("{} {}", note.id, note.title);
                if let Some(successor) = &note.superseded_by {
                    line.push_str(&format!(" [superseded by {successor}]"));
                }
                if note.deleted_at.is_some() {
                    line.push_str(" [deleted]");
                }
                human.push_detail(line);
            }
            let output = NoteListOutput {
                total: notes.len(),
                notes,
            };
            emit_success(globals.output(), "note list", &output, Some(&human))
        }
        NoteCommands::Show { id } => {
            let ctx = open_reader(globals)?;
            let note = ctx.tracker.get_note(&id)?;
            let mut human = note_human(format!("Design note {}", note.id), &note);
            human.push_detail(format!("Context: {}", note.context));
            human.push_detail(format!("Decision: {}", note.decision));
            human.push_detail(format!("Consequences: {}", note.consequences));
            emit_success(globals.output(), "note show", &note, Some(&human))
        }
        NoteCommands::Supersede { id, by } => {
            let mut ctx = open_writer(globals)?;
            let note = ctx.tracker.supersede_note(&ctx.actor, &id, &by)?;
            let human = note_human("Design note superseded", &note);
            emit_success(globals.output(), "note supersede", &note, Some(&human))
        }
        NoteCommands::Delete { id } => {
            let mut ctx = open_writer(globals)?;
            let (note, changed) = ctx.tracker.delete_note(&ctx.actor, &id)?;
            emit_change(globals, "note delete", "Design note deleted", note, changed)
        }
        NoteCommands::Restore { id } => {
            let mut ctx = open_writer(globals)?;
            let (note, changed) = ctx.tracker.restore_note(&ctx.actor, &id)?;
            emit_change(globals, "note restore", "Design note restored", note, changed)
        }
    }
}

fn emit_change(
    globals: &Globals,
    command: &str,
    header: &str,
    note: DesignNote,
    changed: bool,
) -> Result<()> {
    let mut human = note_human(header, &note);
    if !changed {
        human.push_warning("nothing to do".to_string());
    }
    emit_success(
        globals.output(),
        command,
        &NoteChangeOutput { note, changed },
        Some(&human),
    )
}

fn note_human(header: impl Into<String>, note: &DesignNote) -> HumanOutput {
    let mut human = HumanOutput::new(header);
    human.push_summary("ID", note.id.clone());
    human.push_summary("Title", note.title.clone());
    human.push_summary("Project", note.project_id.clone());
    human.push_summary("Author", note.actor.clone());
    if let Some(successor) = &note.superseded_by {
        human.push_summary("Superseded by", successor.clone());
    }
    human
}
