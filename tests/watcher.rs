use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tasknote::backend::{Backend, FileBackend, ListOptions, MemoryBackend};
use tasknote::error::ReconcileError;
use tasknote::events::{EventKind, LifecycleEvents, NoteHandler};
use tasknote::expression::Clause;
use tasknote::note::Note;
use tasknote::task::Task;
use tasknote::versioning::TaskManager;
use tasknote::watcher::{CycleReport, Watcher};

struct Recorder {
    seen: Mutex<Vec<(EventKind, String)>>,
    kind: EventKind,
}

impl Recorder {
    fn for_kind(kind: EventKind) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            kind,
        }
    }

    fn titles(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|(_, title)| title.clone())
            .collect()
    }
}

#[async_trait]
impl NoteHandler for Recorder {
    async fn handle(&self, note: &Note) -> anyhow::Result<()> {
        self.seen
            .lock()
            .unwrap()
            .push((self.kind, note.task.title.clone()));
        Ok(())
    }
}

struct Failing;

#[async_trait]
impl NoteHandler for Failing {
    async fn handle(&self, _note: &Note) -> anyhow::Result<()> {
        anyhow::bail!("handler down")
    }
}

/// How a [`Damaging`] note store mangles each new note.
#[derive(Clone, Copy)]
enum Damage {
    /// Hard-delete the note's predecessor right after storing it.
    EvictPredecessor,
    /// Store the note without its `previous` link.
    DropLink,
}

struct Damaging {
    inner: MemoryBackend<Note>,
    damage: Damage,
}

impl Damaging {
    fn new(damage: Damage) -> Self {
        Self {
            inner: MemoryBackend::new(),
            damage,
        }
    }
}

#[async_trait]
impl Backend<Note> for Damaging {
    async fn create(&self, mut record: Note) -> tasknote::Result<Note> {
        if let Damage::DropLink = self.damage {
            record.previous = None;
        }
        let stored = self.inner.create(record).await?;
        if let (Damage::EvictPredecessor, Some(previous)) = (self.damage, &stored.previous) {
            if let Some(predecessor) = self.inner.get(previous).await? {
                self.inner.hard_delete(&predecessor).await?;
            }
        }
        Ok(stored)
    }

    async fn get(&self, id: &str) -> tasknote::Result<Option<Note>> {
        self.inner.get(id).await
    }

    async fn update(&self, record: Note) -> tasknote::Result<Option<Note>> {
        self.inner.update(record).await
    }

    async fn delete(&self, record: &Note) -> tasknote::Result<Option<Note>> {
        self.inner.delete(record).await
    }

    async fn hard_delete(&self, record: &Note) -> tasknote::Result<()> {
        self.inner.hard_delete(record).await
    }

    async fn list(&self, condition: &Clause, options: &ListOptions) -> tasknote::Result<Vec<Note>> {
        self.inner.list(condition, options).await
    }
}

/// Two polls over a damaged note store: the first creates, the second
/// hits the damage. Returns the second report and the events seen.
async fn poll_edit_with(damage: Damage) -> (Watcher, Task, CycleReport, Vec<String>) {
    let tasks = Arc::new(MemoryBackend::<Task>::new());
    let manager = TaskManager::new(tasks.clone(), Arc::new(Damaging::new(damage)));
    let events = Arc::new(LifecycleEvents::new());
    let created = Arc::new(Recorder::for_kind(EventKind::TaskCreated));
    let updated = Arc::new(Recorder::for_kind(EventKind::TaskUpdated));
    let deleted = Arc::new(Recorder::for_kind(EventKind::TaskDeleted));
    events.created.connect(&created);
    events.updated.connect(&updated);
    events.deleted.connect(&deleted);
    let watcher = Watcher::new(Arc::new(manager), events);
    let (start, end) = all_time();

    let mut task = tasks.create(Task::new("before")).await.unwrap();
    let report = watcher.poll_window(start, end).await.unwrap();
    assert_eq!(report.created, 1);

    task.title = "after".to_string();
    task.touch(None);
    tasks.update(task.clone()).await.unwrap();
    let report = watcher.poll_window(start, end).await.unwrap();

    let mut seen = created.titles();
    seen.extend(updated.titles());
    seen.extend(deleted.titles());
    (watcher, task, report, seen)
}

fn all_time() -> (DateTime<Utc>, DateTime<Utc>) {
    (DateTime::<Utc>::MIN_UTC, Utc::now() + Duration::days(1))
}

#[tokio::test]
async fn failing_handler_does_not_block_others() {
    let tasks = Arc::new(MemoryBackend::<Task>::new());
    let manager = TaskManager::new(tasks.clone(), Arc::new(MemoryBackend::<Note>::new()));
    let events = Arc::new(LifecycleEvents::new());

    let failing = Arc::new(Failing);
    let recorder = Arc::new(Recorder::for_kind(EventKind::TaskCreated));
    events.created.connect(&failing);
    events.created.connect(&recorder);

    tasks.create(Task::new("seen anyway")).await.unwrap();
    let watcher = Watcher::new(Arc::new(manager), events);
    let (start, end) = all_time();
    let report = watcher.poll_window(start, end).await.unwrap();

    assert_eq!(report.created, 1);
    assert_eq!(recorder.titles(), vec!["seen anyway".to_string()]);
}

#[tokio::test]
async fn dropped_handler_stops_receiving() {
    let tasks = Arc::new(MemoryBackend::<Task>::new());
    let manager = TaskManager::new(tasks.clone(), Arc::new(MemoryBackend::<Note>::new()));
    let events = Arc::new(LifecycleEvents::new());
    let recorder = Arc::new(Recorder::for_kind(EventKind::TaskCreated));
    events.created.connect(&recorder);
    let watcher = Watcher::new(Arc::new(manager), events.clone());
    let (start, end) = all_time();

    tasks.create(Task::new("one")).await.unwrap();
    watcher.poll_window(start, end).await.unwrap();
    assert_eq!(events.created.handler_count(), 1);

    let seen = recorder.titles();
    drop(recorder);
    assert_eq!(events.created.handler_count(), 0);

    tasks.create(Task::new("two")).await.unwrap();
    let report = watcher.poll_window(start, end).await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(seen, vec!["one".to_string()]);
}

#[tokio::test]
async fn no_wait_mode_delivers_eventually() {
    let tasks = Arc::new(MemoryBackend::<Task>::new());
    let manager = TaskManager::new(tasks.clone(), Arc::new(MemoryBackend::<Note>::new()));
    let events = Arc::new(LifecycleEvents::new());
    let recorder = Arc::new(Recorder::for_kind(EventKind::TaskCreated));
    events.created.connect(&recorder);

    for title in ["a", "b", "c"] {
        tasks.create(Task::new(title)).await.unwrap();
    }
    let watcher = Watcher::new(Arc::new(manager), events).ensure_each_poll(false);
    let (start, end) = all_time();
    let report = watcher.poll_window(start, end).await.unwrap();
    assert_eq!(report.pending, 3);

    for _ in 0..100 {
        if recorder.titles().len() == 3 {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    let mut titles = recorder.titles();
    titles.sort();
    assert_eq!(titles, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn running_loop_picks_up_file_edits() {
    let dir = tempfile::tempdir().unwrap();
    let tasks = Arc::new(FileBackend::<Task>::in_dir(dir.path()));
    let manager = TaskManager::new(tasks.clone(), Arc::new(FileBackend::<Note>::in_dir(dir.path())));
    let events = Arc::new(LifecycleEvents::new());
    let created = Arc::new(Recorder::for_kind(EventKind::TaskCreated));
    let updated = Arc::new(Recorder::for_kind(EventKind::TaskUpdated));
    events.created.connect(&created);
    events.updated.connect(&updated);

    let watcher = Watcher::new(Arc::new(manager), events)
        .with_period(Duration::milliseconds(50))
        .unwrap()
        .starting_at(Utc::now() - Duration::seconds(1));
    let (handle, cancel) = watcher.spawn();

    // Stamped slightly ahead so the write lands before its window is polled.
    let mut task = Task::new("from disk");
    task.update_time = Utc::now() + Duration::milliseconds(100);
    let mut task = tasks.create(task).await.unwrap();
    wait_for(|| created.titles().len() == 1).await;

    task.title = "edited on disk".to_string();
    task.update_time = Utc::now() + Duration::milliseconds(100);
    tasks.update(task).await.unwrap();
    wait_for(|| updated.titles().len() == 1).await;

    cancel.cancel();
    handle.await.unwrap().unwrap();
    assert_eq!(created.titles(), vec!["from disk".to_string()]);
    assert_eq!(updated.titles(), vec!["edited on disk".to_string()]);
}

async fn wait_for(done: impl Fn() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn vanished_predecessor_fails_reconciliation() {
    let (watcher, mut task, report, seen) = poll_edit_with(Damage::EvictPredecessor).await;
    assert_eq!(report.observed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.emitted(), 0);
    assert_eq!(seen, vec!["before".to_string()]);

    task.title = "again".to_string();
    task.touch(None);
    let err = watcher.trigger_event(task).await.unwrap_err();
    assert!(matches!(err, ReconcileError::MissingPredecessor { .. }), "{err}");
}

#[tokio::test]
async fn unlinked_note_fails_reconciliation() {
    let (watcher, mut task, report, seen) = poll_edit_with(Damage::DropLink).await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.emitted(), 0);
    assert_eq!(seen, vec!["before".to_string()]);

    task.title = "again".to_string();
    task.touch(None);
    let err = watcher.trigger_event(task).await.unwrap_err();
    assert!(matches!(err, ReconcileError::DetachedNote { .. }), "{err}");
}
