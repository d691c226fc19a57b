//! tasknote - versioned tasks with an append-only note trail
//!
//! Every change to a task is captured as an immutable note. Notes of one task
//! form a single linear chain linked through `previous`, ordered by a
//! sortable version token.
//!
//! # Core Concepts
//!
//! - **Notes**: snapshots of a task, minted only when the task changed
//! - **Versioning**: idempotent note taking, revert with truncation, eviction
//! - **Watcher**: polls the store and turns out-of-band edits into events
//! - **Expressions**: typed conditions over record fields, used for queries
//!
//! # Module Organization
//!
//! - `backend`: record storage contract, in-memory and JSON-file backends
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `.tasknote.toml`
//! - `error`: Error types and result aliases
//! - `events`: lifecycle event buses and JSONL output
//! - `expression`: variables, formulas, conditions and their text syntax
//! - `lock`: File locking and atomic writes for the file backend
//! - `note` / `task`: the two record kinds
//! - `trigger`: mutations that emit lifecycle events
//! - `versioning`: the note chain engine
//! - `watcher`: the polling reconciler

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod expression;
pub mod lock;
pub mod note;
pub mod output;
pub mod task;
pub mod trigger;
pub mod versioning;
pub mod watcher;

pub use error::{Error, Result};
