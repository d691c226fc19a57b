//! Notes: immutable, versioned snapshots of a task.
//!
//! A note's `version` is a ULID drawn from one process-wide monotonic
//! generator, so lexicographic order of versions equals issue order, and
//! `note_time` is the ULID's own timestamp.

use std::sync::{Mutex, OnceLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::{Generator, Ulid};

use crate::backend::Record;
use crate::error::{Error, Result};
use crate::expression::{Bindable, Bindings};
use crate::record_schema;
use crate::task::{Task, TaskFields};

fn generator() -> &'static Mutex<Generator> {
    static GENERATOR: OnceLock<Mutex<Generator>> = OnceLock::new();
    GENERATOR.get_or_init(|| Mutex::new(Generator::new()))
}

/// Mint a version token greater than every token minted before it.
pub fn next_version() -> Result<Ulid> {
    let mut generator = generator()
        .lock()
        .map_err(|_| Error::OperationFailed("version generator poisoned".to_string()))?;
    generator
        .generate()
        .map_err(|err| Error::OperationFailed(format!("version generator: {err}")))
}

/// Snapshot of a task plus its place in the task's chain.
///
/// Equality and hashing use `(task_id, version)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    #[serde(flatten)]
    pub task: Task,
    pub version: String,
    pub note_time: DateTime<Utc>,
    /// Version of the note this one follows; `None` for the first note.
    #[serde(default)]
    pub previous: Option<String>,
}

record_schema! {
    /// Variables over [`Note`] fields, including every task field.
    pub struct NoteFields for Note extends task: TaskFields {
        version: Str,
        note_time: Time,
        previous: Str,
    }
}

impl Note {
    /// Snapshot `task` under a freshly minted version.
    pub fn new(task: Task, previous: Option<String>) -> Result<Self> {
        let version = next_version()?;
        let note_time = DateTime::<Utc>::from(version.datetime());
        Ok(Self {
            task,
            version: version.to_string(),
            note_time,
            previous,
        })
    }

    pub fn task_id(&self) -> &str {
        &self.task.task_id
    }

    /// Chain order: note time, then version.
    pub fn chain_cmp(&self, other: &Note) -> std::cmp::Ordering {
        self.note_time
            .cmp(&other.note_time)
            .then_with(|| self.version.cmp(&other.version))
    }
}

impl PartialEq for Note {
    fn eq(&self, other: &Self) -> bool {
        self.task.task_id == other.task.task_id && self.version == other.version
    }
}

impl Eq for Note {}

impl std::hash::Hash for Note {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.task.task_id.hash(state);
        self.version.hash(state);
    }
}

impl Bindable for Note {
    fn bind_fields(&self, bindings: &mut Bindings) {
        self.bind_declared(bindings);
    }
}

impl Record for Note {
    const KIND: &'static str = "note";

    fn record_id(&self) -> &str {
        &self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{Compare, Schema, Value};

    #[test]
    fn versions_are_monotonic_and_fixed_width() {
        let task = Task::new("a");
        let mut last = String::new();
        for _ in 0..500 {
            let note = Note::new(task.clone(), None).unwrap();
            assert_eq!(note.version.len(), 26);
            assert!(note.version > last);
            last = note.version;
        }
    }

    #[test]
    fn note_time_follows_version_order() {
        let task = Task::new("a");
        let first = Note::new(task.clone(), None).unwrap();
        let second = Note::new(task, Some(first.version.clone())).unwrap();
        assert!(second.note_time >= first.note_time);
        assert_eq!(first.chain_cmp(&second), std::cmp::Ordering::Less);
    }

    #[test]
    fn equality_is_by_task_and_version() {
        let task = Task::new("a");
        let note = Note::new(task.clone(), None).unwrap();
        let mut same = note.clone();
        same.task.title = "changed".to_string();
        assert_eq!(note, same);
        assert_ne!(note, Note::new(task, None).unwrap());
    }

    #[test]
    fn serializes_flat() {
        let note = Note::new(Task::new("flat"), None).unwrap();
        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["title"], "flat");
        assert!(json.get("task").is_none());

        let back: Note = serde_json::from_value(json).unwrap();
        assert_eq!(back, note);
        assert_eq!(back.task.update_time, note.task.update_time);
    }

    #[test]
    fn schema_covers_task_and_note_fields() {
        assert!(Note::FIELDS.lookup("title").is_some());
        assert!(Note::FIELDS.lookup("previous").is_some());

        let note = Note::new(Task::new("x"), None).unwrap();
        let bindings = note.bindings();
        assert_eq!(bindings["previous"], Value::Null);
        assert!(Note::FIELDS
            .task
            .task_id
            .equals(note.task_id())
            .evaluate(&bindings)
            .unwrap());
    }
}
