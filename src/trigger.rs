//! Caller-side mutations that announce themselves.
//!
//! [`Trigger`] wraps a [`TaskManager`] and emits a lifecycle event whenever a
//! mutation produced a new note. Mutations the idempotency predicate swallows
//! stay silent.

use std::sync::Arc;

use tracing::info;

use crate::backend::ListOptions;
use crate::error::Result;
use crate::events::{EventKind, LifecycleEvents};
use crate::expression::Clause;
use crate::note::Note;
use crate::task::Task;
use crate::versioning::{Noted, TaskManager};

#[derive(Debug, Clone)]
pub struct Trigger {
    manager: Arc<TaskManager>,
    events: Arc<LifecycleEvents>,
}

impl Trigger {
    pub fn new(manager: Arc<TaskManager>, events: Arc<LifecycleEvents>) -> Self {
        Self { manager, events }
    }

    pub fn manager(&self) -> &Arc<TaskManager> {
        &self.manager
    }

    pub fn events(&self) -> &Arc<LifecycleEvents> {
        &self.events
    }

    async fn announce(&self, kind: EventKind, noted: Noted) -> Note {
        match noted {
            Noted::Created(note) => {
                let delivered = self.events.emit(kind, &note).await;
                info!(
                    event = %kind,
                    task_id = %note.task_id(),
                    version = %note.version,
                    delivered,
                    "event emitted"
                );
                note
            }
            Noted::Unchanged(note) => note,
        }
    }

    pub async fn create(&self, task: Task) -> Result<Note> {
        let note = self.manager.create_task(task).await?;
        Ok(self.announce(EventKind::TaskCreated, Noted::Created(note)).await)
    }

    pub async fn update(&self, task: Task) -> Result<Note> {
        let noted = self.manager.update_task_noted(task).await?;
        Ok(self.announce(EventKind::TaskUpdated, noted).await)
    }

    pub async fn delete(&self, task: Task) -> Result<Note> {
        let noted = self.manager.delete_task_noted(task).await?;
        Ok(self.announce(EventKind::TaskDeleted, noted).await)
    }

    /// Revert and announce the restored state as an update.
    pub async fn revert(&self, task_id: &str, version: &str) -> Result<Note> {
        let note = self.manager.revert_task(task_id, version).await?;
        Ok(self.announce(EventKind::TaskUpdated, Noted::Created(note)).await)
    }

    pub async fn get_task_by_id(&self, task_id: &str) -> Result<Option<Task>> {
        self.manager.get_task_by_id(task_id).await
    }

    pub async fn get_tasks(&self, condition: &Clause, options: &ListOptions) -> Result<Vec<Task>> {
        self.manager.get_tasks(condition, options).await
    }
}
