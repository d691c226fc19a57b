//! Change detection by polling.
//!
//! The backend is the source of truth; each task's head note is the last
//! state seen. Every cycle covers the half-open window `[start, start +
//! period)` of task update times, and windows advance back to back without
//! gaps or overlap. For each task found, [`Watcher::trigger_event`] takes a
//! note and classifies the change.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::ListOptions;
use crate::config::{checked_after, checked_before, Config};
use crate::error::{Error, ReconcileError, Result};
use crate::events::{EventKind, LifecycleEvents};
use crate::expression::{and, Compare};
use crate::note::Note;
use crate::task::Task;
use crate::versioning::TaskManager;

pub const DEFAULT_PERIOD_SECS: i64 = 30;

/// What one reconciliation amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Emitted(EventKind),
    Unchanged,
    Failed,
}

/// Tally of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub observed: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Reconciliations still running when the cycle ended (no-wait mode).
    pub pending: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Emitted(EventKind::TaskCreated) => self.created += 1,
            Outcome::Emitted(EventKind::TaskUpdated) => self.updated += 1,
            Outcome::Emitted(EventKind::TaskDeleted) => self.deleted += 1,
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::Failed => self.failed += 1,
        }
    }

    pub fn emitted(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// The polling reconciler.
#[derive(Debug, Clone)]
pub struct Watcher {
    manager: Arc<TaskManager>,
    events: Arc<LifecycleEvents>,
    period: Duration,
    ensure_each_poll: bool,
    start_at: Option<DateTime<Utc>>,
    cancel: CancellationToken,
}

impl Watcher {
    pub fn new(manager: Arc<TaskManager>, events: Arc<LifecycleEvents>) -> Self {
        Self {
            manager,
            events,
            period: Duration::seconds(DEFAULT_PERIOD_SECS),
            ensure_each_poll: true,
            start_at: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Apply the `[watcher]` section: period, delivery mode, and a first
    /// window starting `lookback` before now.
    pub fn configured(self, config: &Config) -> Result<Self> {
        let lookback = config.watcher.lookback()?;
        Ok(self
            .with_period(config.watcher.period()?)?
            .ensure_each_poll(config.watcher.ensure_each_poll)
            .starting_at(checked_before(Utc::now(), lookback, "watcher.lookback")?))
    }

    pub fn with_period(mut self, period: Duration) -> Result<Self> {
        if period <= Duration::zero() {
            return Err(Error::InvalidArgument(format!(
                "watch period must be positive, got {period}"
            )));
        }
        checked_after(Utc::now(), period, "watch period")?;
        self.period = period;
        Ok(self)
    }

    /// Wait for every reconciliation of a cycle before starting the next.
    pub fn ensure_each_poll(mut self, ensure: bool) -> Self {
        self.ensure_each_poll = ensure;
        self
    }

    /// Start of the first window; defaults to the moment `run` starts.
    pub fn starting_at(mut self, start: DateTime<Utc>) -> Self {
        self.start_at = Some(start);
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Cancelling this token stops the loop before its next cycle.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Poll until cancelled.
    ///
    /// A failed window query is logged and retried one period later. The
    /// loop ends through cancellation, or with an error once the next window
    /// would end past the latest representable time.
    pub async fn run(&self) -> Result<()> {
        let mut window_start = self.start_at.unwrap_or_else(Utc::now);
        info!(
            start = %window_start,
            period_secs = self.period.num_seconds(),
            ensure_each_poll = self.ensure_each_poll,
            "watcher started"
        );

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let window_end = checked_after(window_start, self.period, "watch window")?;
            if !self.sleep_until(window_end).await {
                break;
            }

            match self.poll_window(window_start, window_end).await {
                Ok(report) => {
                    if report.observed > 0 {
                        info!(
                            observed = report.observed,
                            emitted = report.emitted(),
                            failed = report.failed,
                            pending = report.pending,
                            "poll cycle finished"
                        );
                    }
                    window_start = window_end;
                }
                Err(err) => {
                    warn!(
                        start = %window_start,
                        end = %window_end,
                        error = %err,
                        "poll failed; retrying window"
                    );
                    let retry_at = Utc::now()
                        .checked_add_signed(self.period)
                        .unwrap_or(DateTime::<Utc>::MAX_UTC);
                    if !self.sleep_until(retry_at).await {
                        break;
                    }
                }
            }
        }

        info!("watcher stopped");
        Ok(())
    }

    /// Returns `false` when cancelled while waiting.
    async fn sleep_until(&self, deadline: DateTime<Utc>) -> bool {
        let wait = (deadline - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(wait) => true,
        }
    }

    /// Run the loop on its own task.
    pub fn spawn(self) -> (JoinHandle<Result<()>>, CancellationToken) {
        let cancel = self.cancel_token();
        let handle = tokio::spawn(async move { self.run().await });
        (handle, cancel)
    }

    /// Reconcile every task whose update time lies in `[start, end)`.
    pub async fn poll_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<CycleReport> {
        let fields = &Task::FIELDS;
        let in_window = and([
            fields.update_time.clone().at_least(start),
            fields.update_time.clone().less_than(end),
        ]);
        let tasks = self
            .manager
            .get_tasks(&in_window.into(), &ListOptions::new())
            .await?;

        let mut report = CycleReport {
            window_start: Some(start),
            window_end: Some(end),
            observed: tasks.len(),
            ..CycleReport::default()
        };
        debug!(start = %start, end = %end, observed = report.observed, "window polled");

        if self.ensure_each_poll {
            let outcomes = join_all(tasks.into_iter().map(|task| self.reconcile(task))).await;
            for outcome in outcomes {
                report.record(outcome);
            }
        } else {
            for task in tasks {
                let watcher = self.clone();
                tokio::spawn(async move { watcher.reconcile(task).await });
            }
            report.pending = report.observed;
        }
        Ok(report)
    }

    async fn reconcile(&self, task: Task) -> Outcome {
        let task_id = task.task_id.clone();
        match self.trigger_event(task).await {
            Ok(Some((kind, _))) => Outcome::Emitted(kind),
            Ok(None) => Outcome::Unchanged,
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "reconciliation abandoned");
                Outcome::Failed
            }
        }
    }

    /// Note one observed task and emit the matching lifecycle event.
    ///
    /// A task without notes is announced as created. Otherwise the task goes
    /// through `update_task`; if it is unchanged against the head note nothing
    /// is emitted. A real change is classified against the note it follows:
    /// `active` going from true to false is a deletion, anything else an
    /// update.
    pub async fn trigger_event(
        &self,
        task: Task,
    ) -> std::result::Result<Option<(EventKind, Note)>, ReconcileError> {
        let Some(reference) = self.manager.get_current_note_by_task(&task.task_id).await? else {
            let note = self.manager.take_note(&task, None).await?;
            return Ok(Some(self.announce(EventKind::TaskCreated, note).await));
        };

        let task_id = task.task_id.clone();
        let unchanged = self.manager.is_unchanged(&task, &reference);
        let noted = self
            .manager
            .update_task_noted(task)
            .await
            .map_err(|source| ReconcileError::UpdateFailed {
                task_id: task_id.clone(),
                source,
            })?;
        if unchanged || !noted.is_new() {
            debug!(task_id = %task_id, "no change");
            return Ok(None);
        }

        let note = noted.into_note();
        let Some(previous) = note.previous.clone() else {
            return Err(ReconcileError::DetachedNote {
                task_id,
                version: note.version,
            });
        };
        let Some(previous_note) = self.manager.get_note(&previous).await? else {
            return Err(ReconcileError::MissingPredecessor {
                task_id,
                version: note.version,
                previous,
            });
        };

        let kind = if !note.task.active && previous_note.task.active {
            EventKind::TaskDeleted
        } else {
            EventKind::TaskUpdated
        };
        Ok(Some(self.announce(kind, note).await))
    }

    async fn announce(&self, kind: EventKind, note: Note) -> (EventKind, Note) {
        let delivered = self.events.emit(kind, &note).await;
        info!(
            event = %kind,
            task_id = %note.task_id(),
            version = %note.version,
            delivered,
            "event emitted"
        );
        (kind, note)
    }
}
