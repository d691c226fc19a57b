//! Record storage contract.
//!
//! The versioning engine and the watcher only talk to storage through
//! [`Backend`]. Two implementations ship with the crate:
//! - [`MemoryBackend`]: in-process map, used by tests and embedders
//! - [`FileBackend`]: one locked JSON file per record kind

mod file;
mod memory;

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;
use crate::expression::{Bindable, Bindings, Clause, Value, Variable};

pub use file::FileBackend;
pub use memory::MemoryBackend;

/// A storable record with a stable identifier.
pub trait Record: Bindable + Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Short name used in logs and file names.
    const KIND: &'static str;

    fn record_id(&self) -> &str;
}

/// Pagination and ordering for [`Backend::list`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub order_by: Vec<Variable>,
    pub desc: bool,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn order_by(mut self, variable: Variable) -> Self {
        self.order_by.push(variable);
        self
    }

    pub fn desc(mut self, desc: bool) -> Self {
        self.desc = desc;
        self
    }
}

/// Asynchronous CRUD and query over one record kind.
#[async_trait]
pub trait Backend<T: Record>: Send + Sync {
    /// Store a new record. Fails if the identifier is already taken.
    async fn create(&self, record: T) -> Result<T>;

    async fn get(&self, id: &str) -> Result<Option<T>>;

    /// Replace a stored record; `None` when it does not exist.
    async fn update(&self, record: T) -> Result<Option<T>>;

    /// Soft removal: the record is hidden from `get` and `list`.
    async fn delete(&self, record: &T) -> Result<Option<T>>;

    /// Physical removal.
    async fn hard_delete(&self, record: &T) -> Result<()>;

    async fn list(&self, condition: &Clause, options: &ListOptions) -> Result<Vec<T>>;

    async fn list_all(&self, condition: &Clause) -> Result<Vec<T>> {
        self.list(condition, &ListOptions::default()).await
    }
}

/// Filter, order and paginate `records` the way every backend must.
///
/// Ordering is stable; records missing an `order_by` binding sort as null.
pub fn apply_query<T, I>(records: I, condition: &Clause, options: &ListOptions) -> Result<Vec<T>>
where
    T: Record,
    I: IntoIterator<Item = T>,
{
    let mut matched: Vec<(T, Bindings)> = Vec::new();
    for record in records {
        let bindings = record.bindings();
        if condition.evaluate(&bindings)? {
            matched.push((record, bindings));
        }
    }

    if !options.order_by.is_empty() {
        matched.sort_by(|(_, a), (_, b)| {
            let ordering = options
                .order_by
                .iter()
                .map(|variable| {
                    let left = a.get(variable.name()).unwrap_or(&Value::Null);
                    let right = b.get(variable.name()).unwrap_or(&Value::Null);
                    left.sort_cmp(right)
                })
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal);
            if options.desc {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }

    let offset = options.offset.unwrap_or(0);
    let limit = options.limit.unwrap_or(usize::MAX);
    Ok(matched
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|(record, _)| record)
        .collect())
}
