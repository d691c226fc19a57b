//! Tasks: the mutable, user-facing records whose history is noted.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use uuid::Uuid;

use crate::backend::Record;
use crate::expression::{Bindable, Bindings, Value};
use crate::record_schema;

pub const DEFAULT_STATUS: &str = "todo";

fn default_status() -> String {
    DEFAULT_STATUS.to_string()
}

fn default_active() -> bool {
    true
}

/// Current state of a task.
///
/// Equality and hashing use `task_id` only; two snapshots of the same task
/// compare equal even if their fields differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    #[serde(default)]
    pub create_by: String,
    #[serde(default)]
    pub update_by: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_done: bool,
    /// Cleared instead of removing the task.
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub percent: u8,
    /// Open-ended fields, addressable in conditions as `extras.<key>`.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extras: Map<String, serde_json::Value>,
}

record_schema! {
    /// Variables over [`Task`] fields.
    pub struct TaskFields for Task dynamic "extras" {
        task_id: Str,
        create_time: Time,
        update_time: Time,
        create_by: Str,
        update_by: Str,
        title: Str,
        content: Str,
        status: Str,
        due_date: Time,
        start_date: Time,
        tags: List,
        is_done: Bool,
        active: Bool,
        percent: Int,
    }
}

impl Task {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: Uuid::new_v4().to_string(),
            create_time: now,
            update_time: now,
            create_by: String::new(),
            update_by: String::new(),
            title: title.into(),
            content: String::new(),
            status: default_status(),
            due_date: None,
            start_date: None,
            tags: Vec::new(),
            is_done: false,
            active: true,
            percent: 0,
            extras: Map::new(),
        }
    }

    /// Stamp a new update time, strictly later than the current one unless
    /// it already sits at the latest representable time.
    pub fn touch(&mut self, by: Option<&str>) {
        let floor = self
            .update_time
            .checked_add_signed(Duration::microseconds(1))
            .unwrap_or(self.update_time);
        self.update_time = Utc::now().max(floor);
        if let Some(by) = by {
            self.update_by = by.to_string();
        }
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.task_id == other.task_id
    }
}

impl Eq for Task {}

impl std::hash::Hash for Task {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.task_id.hash(state);
    }
}

impl Bindable for Task {
    fn bind_fields(&self, bindings: &mut Bindings) {
        self.bind_declared(bindings);
        for (key, value) in &self.extras {
            if let Some(value) = Value::from_json(value) {
                bindings.insert(format!("extras.{key}"), value);
            }
        }
    }
}

impl Record for Task {
    const KIND: &'static str = "task";

    fn record_id(&self) -> &str {
        &self.task_id
    }
}
