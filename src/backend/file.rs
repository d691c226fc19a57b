use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{apply_query, Backend, ListOptions, Record};
use crate::error::{Error, Result};
use crate::expression::Clause;
use crate::lock::{lock_path_for, write_atomic, FileLock, DEFAULT_LOCK_TIMEOUT_MS};

const SCHEMA_PREFIX: &str = "tasknote";

#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Record"))]
struct Stored<T> {
    #[serde(flatten)]
    record: T,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    archived: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Record"))]
struct Collection<T> {
    #[serde(default)]
    schema_version: String,
    #[serde(default = "Vec::new")]
    records: Vec<Stored<T>>,
}

impl<T: Record> Collection<T> {
    fn empty() -> Self {
        Self {
            schema_version: format!("{SCHEMA_PREFIX}.{}.v1", T::KIND),
            records: Vec::new(),
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.records
            .iter()
            .position(|stored| stored.record.record_id() == id)
    }

    fn live(&self, id: &str) -> Option<usize> {
        self.position(id)
            .filter(|idx| !self.records[*idx].archived)
    }
}

/// Backend over a single JSON file.
///
/// Every operation takes the file's advisory lock, reads the whole
/// collection, and (for writes) replaces the file atomically. The file may
/// be edited by hand between operations.
#[derive(Debug, Clone)]
pub struct FileBackend<T> {
    path: PathBuf,
    timeout_ms: u64,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> FileBackend<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            _record: PhantomData,
        }
    }

    /// `<dir>/<kind>s.json`, e.g. `tasks.json`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(format!("{}s.json", T::KIND)))
    }

    pub fn with_lock_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file with an empty collection if it is missing.
    pub fn init(&self) -> Result<()> {
        let _lock = FileLock::acquire(lock_path_for(&self.path), self.timeout_ms)?;
        if !self.path.exists() {
            write_collection(&self.path, &Collection::<T>::empty())?;
        }
        Ok(())
    }

    /// Run `op` on the collection under the lock, off the async runtime.
    ///
    /// `op` returns its result and whether the collection must be written.
    async fn with_collection<R, F>(&self, op: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Collection<T>) -> Result<(R, bool)> + Send + 'static,
    {
        let path = self.path.clone();
        let timeout_ms = self.timeout_ms;
        tokio::task::spawn_blocking(move || {
            let _lock = FileLock::acquire(lock_path_for(&path), timeout_ms)?;
            let mut collection = read_collection::<T>(&path)?;
            let (result, dirty) = op(&mut collection)?;
            if dirty {
                write_collection(&path, &collection)?;
                debug!(path = %path.display(), records = collection.records.len(), "store written");
            }
            Ok(result)
        })
        .await
        .map_err(|err| Error::OperationFailed(format!("store task failed: {err}")))?
    }
}

fn read_collection<T: Record>(path: &Path) -> Result<Collection<T>> {
    match fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Ok(Collection::empty()),
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Collection::empty()),
        Err(err) => Err(err.into()),
    }
}

fn write_collection<T: Record>(path: &Path, collection: &Collection<T>) -> Result<()> {
    let mut data = serde_json::to_vec_pretty(collection)?;
    data.push(b'\n');
    write_atomic(path, &data)
}

#[async_trait]
impl<T: Record> Backend<T> for FileBackend<T> {
    async fn create(&self, record: T) -> Result<T> {
        self.with_collection(move |collection| {
            if collection.position(record.record_id()).is_some() {
                return Err(Error::DuplicateRecord(format!(
                    "{} {}",
                    T::KIND,
                    record.record_id()
                )));
            }
            collection.records.push(Stored {
                record: record.clone(),
                archived: false,
            });
            Ok((record, true))
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Option<T>> {
        let id = id.to_string();
        self.with_collection(move |collection| {
            let found = collection
                .live(&id)
                .map(|idx| collection.records[idx].record.clone());
            Ok((found, false))
        })
        .await
    }

    async fn update(&self, record: T) -> Result<Option<T>> {
        self.with_collection(move |collection| match collection.live(record.record_id()) {
            Some(idx) => {
                collection.records[idx].record = record.clone();
                Ok((Some(record), true))
            }
            None => Ok((None, false)),
        })
        .await
    }

    async fn delete(&self, record: &T) -> Result<Option<T>> {
        let id = record.record_id().to_string();
        self.with_collection(move |collection| match collection.live(&id) {
            Some(idx) => {
                collection.records[idx].archived = true;
                Ok((Some(collection.records[idx].record.clone()), true))
            }
            None => Ok((None, false)),
        })
        .await
    }

    async fn hard_delete(&self, record: &T) -> Result<()> {
        let id = record.record_id().to_string();
        self.with_collection(move |collection| {
            let before = collection.records.len();
            collection
                .records
                .retain(|stored| stored.record.record_id() != id);
            Ok(((), collection.records.len() != before))
        })
        .await
    }

    async fn list(&self, condition: &Clause, options: &ListOptions) -> Result<Vec<T>> {
        let live: Vec<T> = self
            .with_collection(|collection| {
                let live = collection
                    .records
                    .iter()
                    .filter(|stored| !stored.archived)
                    .map(|stored| stored.record.clone())
                    .collect();
                Ok((live, false))
            })
            .await?;
        apply_query(live, condition, options)
    }
}
