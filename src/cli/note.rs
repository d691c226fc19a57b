//! tasknote note command implementations.

use serde::Serialize;

use crate::cli::task::task_fields;
use crate::cli::Context;
use crate::error::{Error, Result};
use crate::expression::parse_condition;
use crate::expression::Bindable;
use crate::note::Note;
use crate::output::{emit_success, HumanOutput};
use crate::versioning::DependencyCheck;

#[derive(Serialize)]
struct NoteListOutput<'a> {
    task_id: &'a str,
    total: usize,
    notes: &'a [Note],
}

#[derive(Serialize)]
struct NoteDeleteOutput<'a> {
    deleted: &'a [String],
    checked: bool,
}

pub async fn run_list(ctx: &Context, task_id: String, condition: Option<String>) -> Result<()> {
    let mut notes = ctx.manager().list_notes(&task_id).await?;
    if let Some(raw) = condition.as_deref() {
        let condition = parse_condition(raw, &Note::FIELDS)?;
        let mut kept = Vec::with_capacity(notes.len());
        for note in notes {
            if condition.evaluate(&note.bindings())? {
                kept.push(note);
            }
        }
        notes = kept;
    }

    let mut human = HumanOutput::new(format!("Notes of {task_id}"));
    human.field("Total", notes.len().to_string());
    for note in &notes {
        human.row(note_line(note));
    }

    emit_success(
        ctx.output,
        "note list",
        &NoteListOutput {
            task_id: &task_id,
            total: notes.len(),
            notes: &notes,
        },
        Some(&human),
    )
}

pub async fn run_show(ctx: &Context, version: String) -> Result<()> {
    let note = load_note(ctx, &version).await?;
    let following = ctx.manager().get_following_note(&version).await?;

    let mut human = HumanOutput::new(format!("Note {}", note.version));
    human.field("Noted", note.note_time.to_rfc3339());
    human.field("Previous", note.previous.clone().unwrap_or_default());
    if let Some(following) = &following {
        human.field("Next", following.version.clone());
    }
    task_fields(&mut human, &note.task);

    emit_success(ctx.output, "note show", &note, Some(&human))
}

pub async fn run_revert(ctx: &Context, task_id: String, version: String) -> Result<()> {
    let note = ctx.trigger.revert(&task_id, &version).await?;

    let mut human = HumanOutput::new("Task reverted");
    task_fields(&mut human, &note.task);
    human.field("Restored from", version);
    human.field("Version", note.version.clone());

    emit_success(ctx.output, "note revert", &note, Some(&human))
}

pub async fn run_delete(ctx: &Context, versions: Vec<String>, force: bool) -> Result<()> {
    let mut notes = Vec::with_capacity(versions.len());
    for version in &versions {
        notes.push(load_note(ctx, version).await?);
    }

    let check = if force {
        DependencyCheck::Skip
    } else {
        DependencyCheck::Strict
    };
    if !ctx.manager().delete_notes(&notes, check).await? {
        return Err(Error::ChainIntegrity(format!(
            "refused to delete {} note(s): not one continuous run, or the newest still has a follower",
            notes.len()
        )));
    }

    let mut human = HumanOutput::new("Notes deleted");
    human.field("Deleted", versions.len().to_string());
    for version in &versions {
        human.row(version.clone());
    }

    emit_success(
        ctx.output,
        "note delete",
        &NoteDeleteOutput {
            deleted: &versions,
            checked: !force,
        },
        Some(&human),
    )
}

async fn load_note(ctx: &Context, version: &str) -> Result<Note> {
    ctx.manager()
        .get_note(version)
        .await?
        .ok_or_else(|| Error::NoteNotFound(version.to_string()))
}

fn note_line(note: &Note) -> String {
    let mut line = format!(
        "{} {} [{}] {}",
        note.version,
        note.note_time.to_rfc3339(),
        note.task.status,
        note.task.title
    );
    if !note.task.active {
        line.push_str(" (inactive)");
    }
    line
}
