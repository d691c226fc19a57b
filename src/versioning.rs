//! The versioning engine: tasks in, notes out.
//!
//! Every task has a chain of notes linked backwards through `previous`.
//! [`TaskManager`] keeps that chain linear:
//!
//! - `take_note` mints a note only when the idempotency predicate says the
//!   task changed since the reference note
//! - noting against an older version (a revert) first deletes every note
//!   after it, so the chain never forks
//! - after each new note, notes beyond `max_notes` are evicted oldest first
//! - `delete_notes` refuses batches that are not one unbroken run, or whose
//!   newest note still has a follower

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::backend::{Backend, ListOptions};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::expression::{and, Clause, Compare};
use crate::note::Note;
use crate::task::Task;

/// Decides whether `task` is already captured by `note`.
pub type IdempotencyCheck = Arc<dyn Fn(&Task, &Note) -> bool + Send + Sync>;

/// Default predicate: the task's update time matches the note's.
pub fn same_update_time(task: &Task, note: &Note) -> bool {
    task.update_time == note.task.update_time
}

/// Dependency checks applied by [`TaskManager::delete_notes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyCheck<'a> {
    /// Delete unconditionally.
    Skip,
    /// Batch must be continuous and its newest note must have no follower.
    Strict,
    /// As `Strict`, but the given version may follow the newest note.
    AllowFollower(&'a str),
}

/// Outcome of noting a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Noted {
    /// A new note was written.
    Created(Note),
    /// The task was unchanged; this is the existing reference note.
    Unchanged(Note),
}

impl Noted {
    pub fn note(&self) -> &Note {
        match self {
            Noted::Created(note) | Noted::Unchanged(note) => note,
        }
    }

    pub fn into_note(self) -> Note {
        match self {
            Noted::Created(note) | Noted::Unchanged(note) => note,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Noted::Created(_))
    }
}

pub const DEFAULT_MAX_NOTES: usize = 100;

type TaskLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Held while noting one task. On drop the map entry goes away unless
/// another writer holds or awaits the same lock.
struct TaskLock<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    task_id: String,
    locks: &'a TaskLocks,
}

impl Drop for TaskLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Release under the map lock so no new writer can clone the entry
        // between the count check and the removal.
        self.guard.take();
        if locks
            .get(&self.task_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.task_id);
        }
    }
}

/// Owns the task -> note lifecycle over two backends.
pub struct TaskManager {
    tasks: Arc<dyn Backend<Task>>,
    notes: Arc<dyn Backend<Note>>,
    max_notes: Option<usize>,
    unchanged: IdempotencyCheck,
    serialize_per_task: bool,
    task_locks: TaskLocks,
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("max_notes", &self.max_notes)
            .field("serialize_per_task", &self.serialize_per_task)
            .finish_non_exhaustive()
    }
}

impl TaskManager {
    pub fn new(tasks: Arc<dyn Backend<Task>>, notes: Arc<dyn Backend<Note>>) -> Self {
        Self {
            tasks,
            notes,
            max_notes: Some(DEFAULT_MAX_NOTES),
            unchanged: Arc::new(same_update_time),
            serialize_per_task: true,
            task_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Apply the `[notes]` section of `config`.
    pub fn configured(self, config: &Config) -> Self {
        self.with_max_notes(config.notes.limit())
            .with_serialize_per_task(config.notes.serialize_per_task)
    }

    /// `None` disables eviction.
    pub fn with_max_notes(mut self, max_notes: Option<usize>) -> Self {
        self.max_notes = max_notes;
        self
    }

    pub fn with_idempotency<F>(mut self, unchanged: F) -> Self
    where
        F: Fn(&Task, &Note) -> bool + Send + Sync + 'static,
    {
        self.unchanged = Arc::new(unchanged);
        self
    }

    /// Serialize `take_note` per task id. Without it, two concurrent writers
    /// can fork a chain.
    pub fn with_serialize_per_task(mut self, serialize: bool) -> Self {
        self.serialize_per_task = serialize;
        self
    }

    pub fn max_notes(&self) -> Option<usize> {
        self.max_notes
    }

    /// Whether the idempotency predicate considers `task` captured by `note`.
    pub fn is_unchanged(&self, task: &Task, note: &Note) -> bool {
        (self.unchanged)(task, note)
    }

    async fn lock_task(&self, task_id: &str) -> Option<TaskLock<'_>> {
        if !self.serialize_per_task {
            return None;
        }
        let lock = {
            let mut locks = self.task_locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks
                .entry(task_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        Some(TaskLock {
            guard: Some(lock.lock_owned().await),
            task_id: task_id.to_string(),
            locks: &self.task_locks,
        })
    }

    // ---------------------------------------------------------------------
    // Tasks
    // ---------------------------------------------------------------------

    pub async fn get_task_by_id(&self, task_id: &str) -> Result<Option<Task>> {
        self.tasks.get(task_id).await
    }

    pub async fn get_tasks(&self, condition: &Clause, options: &ListOptions) -> Result<Vec<Task>> {
        self.tasks.list(condition, options).await
    }

    /// Store a new task and take its first note.
    pub async fn create_task(&self, task: Task) -> Result<Note> {
        let task = self.tasks.create(task).await?;
        info!(task_id = %task.task_id, "task created");
        self.take_note(&task, None).await
    }

    /// Write `task` and note it. The caller stamps `update_time`; an
    /// unchanged stamp yields the current head note.
    pub async fn update_task(&self, task: Task) -> Result<Note> {
        Ok(self.update_task_noted(task).await?.into_note())
    }

    pub async fn update_task_noted(&self, task: Task) -> Result<Noted> {
        let task_id = task.task_id.clone();
        let stored = self
            .tasks
            .update(task)
            .await?
            .ok_or(Error::TaskNotFound(task_id))?;
        self.note_task(&stored, None).await
    }

    /// Mark `task` inactive, stamp it and note it. Tasks are never removed.
    pub async fn delete_task(&self, task: Task) -> Result<Note> {
        Ok(self.delete_task_noted(task).await?.into_note())
    }

    pub async fn delete_task_noted(&self, mut task: Task) -> Result<Noted> {
        task.active = false;
        task.touch(None);
        info!(task_id = %task.task_id, "task deactivated");
        self.update_task_noted(task).await
    }

    /// Restore `task_id` to the state captured at `version` and continue the
    /// chain from there, discarding every later note.
    pub async fn revert_task(&self, task_id: &str, version: &str) -> Result<Note> {
        let target = self.note_of_task(task_id, version).await?;
        let current = self
            .get_task_by_id(task_id)
            .await?
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;

        let mut restored = target.task.clone();
        restored.create_time = current.create_time;
        restored.update_time = current.update_time;
        restored.touch(None);

        let stored = self
            .tasks
            .update(restored)
            .await?
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
        info!(task_id, version, "task reverted");
        self.take_note(&stored, Some(version)).await
    }

    // ---------------------------------------------------------------------
    // Notes
    // ---------------------------------------------------------------------

    fn of_task(task_id: &str) -> Clause {
        Note::FIELDS.task.task_id.equals(task_id).into()
    }

    /// The head note: the task's note with the highest version.
    pub async fn get_current_note_by_task(&self, task_id: &str) -> Result<Option<Note>> {
        let options = ListOptions::new()
            .order_by(Note::FIELDS.version)
            .desc(true)
            .limit(1);
        let mut notes = self.notes.list(&Self::of_task(task_id), &options).await?;
        Ok(notes.pop())
    }

    pub async fn get_note(&self, version: &str) -> Result<Option<Note>> {
        self.notes.get(version).await
    }

    /// The note whose `previous` is `version`.
    pub async fn get_following_note(&self, version: &str) -> Result<Option<Note>> {
        let mut followers = self
            .notes
            .list_all(&Note::FIELDS.previous.equals(version).into())
            .await?;
        if followers.len() > 1 {
            warn!(version, count = followers.len(), "chain is forked");
        }
        followers.sort_by(Note::chain_cmp);
        Ok(followers.into_iter().next())
    }

    /// All notes of a task, oldest first.
    pub async fn list_notes(&self, task_id: &str) -> Result<Vec<Note>> {
        let mut notes = self.notes.list_all(&Self::of_task(task_id)).await?;
        notes.sort_by(Note::chain_cmp);
        Ok(notes)
    }

    async fn note_of_task(&self, task_id: &str, version: &str) -> Result<Note> {
        self.get_note(version)
            .await?
            .filter(|note| note.task_id() == task_id)
            .ok_or_else(|| Error::NoteNotFound(version.to_string()))
    }

    /// Note `task` against its head, or against `previous_version` when
    /// continuing from an older note.
    ///
    /// Returns the reference note itself when the task is unchanged.
    pub async fn take_note(&self, task: &Task, previous_version: Option<&str>) -> Result<Note> {
        Ok(self.note_task(task, previous_version).await?.into_note())
    }

    pub async fn note_task(&self, task: &Task, previous_version: Option<&str>) -> Result<Noted> {
        let _guard = self.lock_task(&task.task_id).await;

        let reference = match previous_version {
            Some(version) => Some(self.note_of_task(&task.task_id, version).await?),
            None => self.get_current_note_by_task(&task.task_id).await?,
        };

        if let Some(reference) = &reference {
            if self.is_unchanged(task, reference) {
                debug!(task_id = %task.task_id, version = %reference.version, "task unchanged");
                return Ok(Noted::Unchanged(reference.clone()));
            }
        }

        if let (Some(_), Some(reference)) = (previous_version, &reference) {
            self.truncate_after(reference).await?;
        }

        let note = Note::new(task.clone(), reference.map(|r| r.version))?;
        let note = self.notes.create(note).await?;
        debug!(
            task_id = %task.task_id,
            version = %note.version,
            previous = ?note.previous,
            "note taken"
        );

        if let Some(max) = self.max_notes {
            self.check_maximum(&task.task_id, max).await?;
        }
        Ok(Noted::Created(note))
    }

    /// Drop every note of the reference's task newer than the reference.
    async fn truncate_after(&self, reference: &Note) -> Result<()> {
        let later = and([
            Self::of_task(reference.task_id()),
            Note::FIELDS.version.greater_than(reference.version.as_str()).into(),
        ]);
        let later = self.notes.list_all(&later.into()).await?;
        if later.is_empty() {
            return Ok(());
        }
        info!(
            task_id = %reference.task_id(),
            version = %reference.version,
            dropped = later.len(),
            "truncating chain"
        );
        self.delete_notes(&later, DependencyCheck::Skip).await?;
        Ok(())
    }

    /// Physically delete `notes`.
    ///
    /// Unless `check` is `Skip`, the batch (sorted by note time) must be one
    /// continuous run of a single task's chain, and its newest note must not
    /// have a follower outside the batch. Returns `false` and deletes nothing
    /// when either check fails.
    pub async fn delete_notes(&self, notes: &[Note], check: DependencyCheck<'_>) -> Result<bool> {
        let Some(first) = notes.first() else {
            return Ok(true);
        };
        let mut sorted = notes.to_vec();
        sorted.sort_by(Note::chain_cmp);

        if check != DependencyCheck::Skip {
            let task_id = first.task_id();
            if sorted.iter().any(|note| note.task_id() != task_id) {
                warn!(task_id, "refusing to delete notes of several tasks at once");
                return Ok(false);
            }
            for pair in sorted.windows(2) {
                if pair[1].previous.as_deref() != Some(pair[0].version.as_str()) {
                    warn!(
                        task_id,
                        version = %pair[1].version,
                        expected_previous = %pair[0].version,
                        "refusing to delete discontinuous notes"
                    );
                    return Ok(false);
                }
            }

            let Some(last) = sorted.last() else {
                return Ok(true);
            };
            let followers = self
                .notes
                .list_all(&Note::FIELDS.previous.equals(last.version.as_str()).into())
                .await?;
            let blocking = followers.iter().find(|follower| match check {
                DependencyCheck::AllowFollower(allowed) => follower.version != allowed,
                _ => true,
            });
            if let Some(follower) = blocking {
                warn!(
                    task_id,
                    version = %last.version,
                    follower = %follower.version,
                    "refusing to delete note with a live follower"
                );
                return Ok(false);
            }
        }

        for note in &sorted {
            self.notes.hard_delete(note).await?;
        }
        debug!(count = sorted.len(), "notes deleted");
        Ok(true)
    }

    /// Evict all but the newest `max` notes of a task.
    ///
    /// The oldest kept note is the only follower the evicted run may have.
    /// If the run is refused (a fork, or a concurrent writer), nothing is
    /// evicted this time.
    pub async fn check_maximum(&self, task_id: &str, max: usize) -> Result<()> {
        let mut notes = self.list_notes(task_id).await?;
        if notes.len() <= max {
            return Ok(());
        }
        notes.reverse();
        let evict = notes.split_off(max);
        let Some(oldest_kept) = notes.last() else {
            return Ok(());
        };

        if self
            .delete_notes(&evict, DependencyCheck::AllowFollower(&oldest_kept.version))
            .await?
        {
            debug!(task_id, evicted = evict.len(), "old notes evicted");
        } else {
            warn!(task_id, "eviction skipped");
        }
        Ok(())
    }
}
