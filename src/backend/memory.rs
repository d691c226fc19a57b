use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{apply_query, Backend, ListOptions, Record};
use crate::error::{Error, Result};
use crate::expression::Clause;

#[derive(Debug, Clone)]
struct Entry<T> {
    record: T,
    archived: bool,
}

/// In-process backend keyed by record id.
///
/// Records are listed in id order before any `order_by` is applied.
#[derive(Debug)]
pub struct MemoryBackend<T> {
    entries: RwLock<BTreeMap<String, Entry<T>>>,
}

impl<T> Default for MemoryBackend<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<T: Record> MemoryBackend<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (not soft-deleted) records.
    pub async fn len(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| !entry.archived)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl<T: Record> Backend<T> for MemoryBackend<T> {
    async fn create(&self, record: T) -> Result<T> {
        let mut entries = self.entries.write().await;
        let id = record.record_id().to_string();
        if entries.contains_key(&id) {
            return Err(Error::DuplicateRecord(format!("{} {id}", T::KIND)));
        }
        entries.insert(
            id,
            Entry {
                record: record.clone(),
                archived: false,
            },
        );
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<T>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(id)
            .filter(|entry| !entry.archived)
            .map(|entry| entry.record.clone()))
    }

    async fn update(&self, record: T) -> Result<Option<T>> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(record.record_id()) {
            Some(entry) if !entry.archived => {
                entry.record = record.clone();
                Ok(Some(record))
            }
            _ => Ok(None),
        }
    }

    async fn delete(&self, record: &T) -> Result<Option<T>> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(record.record_id()) {
            Some(entry) if !entry.archived => {
                entry.archived = true;
                Ok(Some(entry.record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn hard_delete(&self, record: &T) -> Result<()> {
        self.entries.write().await.remove(record.record_id());
        Ok(())
    }

    async fn list(&self, condition: &Clause, options: &ListOptions) -> Result<Vec<T>> {
        let live: Vec<T> = {
            let entries = self.entries.read().await;
            entries
                .values()
                .filter(|entry| !entry.archived)
                .map(|entry| entry.record.clone())
                .collect()
        };
        apply_query(live, condition, options)
    }
}
