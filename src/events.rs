//! Lifecycle event buses and JSONL event output.
//!
//! Each lifecycle event (created, updated, deleted) is an [`EventBus`] that
//! delivers a [`Note`] to every live handler. The bus holds handlers weakly:
//! a handler stays subscribed while some owner keeps its `Arc` alive, and is
//! dropped from delivery as soon as the last `Arc` goes away. `disconnect`
//! removes a handler explicitly.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::note::Note;

pub const EVENT_SCHEMA_VERSION: &str = "tasknote.event.v1";

/// Receives notes from an [`EventBus`].
#[async_trait]
pub trait NoteHandler: Send + Sync {
    async fn handle(&self, note: &Note) -> anyhow::Result<()>;
}

/// Adapter for synchronous closures.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> NoteHandler for FnHandler<F>
where
    F: Fn(&Note) -> anyhow::Result<()> + Send + Sync,
{
    async fn handle(&self, note: &Note) -> anyhow::Result<()> {
        (self.0)(note)
    }
}

/// Returned by [`EventBus::connect`]; pass to `disconnect` to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Slot {
    id: HandlerId,
    handler: Weak<dyn NoteHandler>,
}

/// A named channel delivering notes to weakly held handlers.
pub struct EventBus {
    name: String,
    next_id: AtomicU64,
    slots: Mutex<Vec<Slot>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("name", &self.name)
            .field("handlers", &self.handler_count())
            .finish()
    }
}

impl EventBus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            next_id: AtomicU64::new(0),
            slots: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, Vec<Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe `handler` for as long as the caller keeps it alive.
    pub fn connect<H>(&self, handler: &Arc<H>) -> HandlerId
    where
        H: NoteHandler + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: Arc<dyn NoteHandler> = handler.clone();
        self.slots().push(Slot {
            id,
            handler: Arc::downgrade(&handler),
        });
        id
    }

    /// Subscribe a closure. The returned `Arc` is the subscription: drop it
    /// to stop delivery.
    pub fn connect_fn<F>(&self, f: F) -> Arc<FnHandler<F>>
    where
        F: Fn(&Note) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler = Arc::new(FnHandler(f));
        self.connect(&handler);
        handler
    }

    /// Returns whether the handler was still subscribed.
    pub fn disconnect(&self, id: HandlerId) -> bool {
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|slot| slot.id != id);
        slots.len() != before
    }

    /// Live handlers; dead slots are pruned.
    pub fn handler_count(&self) -> usize {
        let mut slots = self.slots();
        slots.retain(|slot| slot.handler.strong_count() > 0);
        slots.len()
    }

    /// Deliver `note` to every live handler in subscription order, awaiting
    /// each one. A failing handler is logged and does not stop delivery.
    ///
    /// Returns the number of handlers that accepted the note.
    pub async fn emit(&self, note: &Note) -> usize {
        let live: Vec<Arc<dyn NoteHandler>> = {
            let mut slots = self.slots();
            slots.retain(|slot| slot.handler.strong_count() > 0);
            slots.iter().filter_map(|slot| slot.handler.upgrade()).collect()
        };

        let mut delivered = 0;
        for handler in live {
            match handler.handle(note).await {
                Ok(()) => delivered += 1,
                Err(err) => warn!(
                    bus = %self.name,
                    task_id = %note.task_id(),
                    version = %note.version,
                    error = %err,
                    "event handler failed"
                ),
            }
        }
        debug!(bus = %self.name, version = %note.version, delivered, "event emitted");
        delivered
    }
}

/// Lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::TaskCreated,
        EventKind::TaskUpdated,
        EventKind::TaskDeleted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::TaskCreated => "task_created",
            EventKind::TaskUpdated => "task_updated",
            EventKind::TaskDeleted => "task_deleted",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three lifecycle buses, built once and shared by the trigger and the
/// watcher.
#[derive(Debug)]
pub struct LifecycleEvents {
    pub created: EventBus,
    pub updated: EventBus,
    pub deleted: EventBus,
}

impl Default for LifecycleEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleEvents {
    pub fn new() -> Self {
        Self {
            created: EventBus::new(EventKind::TaskCreated.as_str()),
            updated: EventBus::new(EventKind::TaskUpdated.as_str()),
            deleted: EventBus::new(EventKind::TaskDeleted.as_str()),
        }
    }

    pub fn bus(&self, kind: EventKind) -> &EventBus {
        match kind {
            EventKind::TaskCreated => &self.created,
            EventKind::TaskUpdated => &self.updated,
            EventKind::TaskDeleted => &self.deleted,
        }
    }

    pub async fn emit(&self, kind: EventKind, note: &Note) -> usize {
        self.bus(kind).emit(note).await
    }

    /// Write every lifecycle event to `sink`.
    ///
    /// The returned handlers are the subscriptions; keep them alive for as
    /// long as output is wanted.
    pub fn attach_sink(&self, sink: Arc<JsonlSink>) -> Vec<Arc<SinkHandler>> {
        EventKind::ALL
            .into_iter()
            .map(|kind| {
                let handler = Arc::new(SinkHandler {
                    sink: sink.clone(),
                    kind,
                });
                self.bus(kind).connect(&handler);
                handler
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub enum EventDestination {
    Stdout,
    File(PathBuf),
}

impl EventDestination {
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        raw.and_then(|value| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return None;
            }
            if trimmed == "-" {
                return Some(EventDestination::Stdout);
            }
            Some(EventDestination::File(PathBuf::from(trimmed)))
        })
    }

    pub fn open(&self) -> Result<JsonlSink> {
        match self {
            EventDestination::Stdout => Ok(JsonlSink::stdout()),
            EventDestination::File(path) => JsonlSink::file(path),
        }
    }
}

/// One line of event output.
#[derive(Debug, Clone, Serialize)]
pub struct Event<'a> {
    pub schema_version: &'static str,
    pub event: EventKind,
    pub timestamp: DateTime<Utc>,
    pub note: &'a Note,
}

impl<'a> Event<'a> {
    pub fn new(event: EventKind, note: &'a Note) -> Self {
        Self {
            schema_version: EVENT_SCHEMA_VERSION,
            event,
            timestamp: Utc::now(),
            note,
        }
    }
}

/// Writes events as JSON lines to stdout or a file.
pub struct JsonlSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonlSink {
    pub fn stdout() -> Self {
        Self::from_writer(Box::new(std::io::stdout()))
    }

    /// Append to `path`, creating it if necessary.
    pub fn file(path: &Path) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self::from_writer(Box::new(file)))
    }

    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn write(&self, event: &Event<'_>) -> Result<()> {
        let serialized = serde_json::to_vec(event)?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(&serialized)?;
        writer.write_all(b"\n")?;
        writer.flush().map_err(Error::Io)?;
        Ok(())
    }
}

/// Bus subscription writing one event kind to a [`JsonlSink`].
pub struct SinkHandler {
    sink: Arc<JsonlSink>,
    kind: EventKind,
}

#[async_trait]
impl NoteHandler for SinkHandler {
    async fn handle(&self, note: &Note) -> anyhow::Result<()> {
        self.sink.write(&Event::new(self.kind, note))?;
        Ok(())
    }
}
