//! Command-line interface for tasknote
//!
//! This module defines the CLI structure using clap derive macros.
//! Each command group is implemented in its own submodule.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::backend::FileBackend;
use crate::config::Config;
use crate::error::Result;
use crate::events::{EventDestination, LifecycleEvents, SinkHandler};
use crate::note::Note;
use crate::output::OutputOptions;
use crate::task::Task;
use crate::trigger::Trigger;
use crate::versioning::TaskManager;

mod init;
mod note;
mod task;
mod watch;

/// tasknote - versioned tasks with change notes
///
/// Every change to a task is captured as a note in a linear chain. Changes
/// made by editing the store directly are picked up by `tasknote watch`.
#[derive(Parser, Debug)]
#[command(name = "tasknote")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Store root holding `.tasknote.toml` (defaults to current directory)
    #[arg(long, global = true, env = "TASKNOTE_ROOT")]
    pub root: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Write lifecycle events as JSON lines to a file, or `-` for stdout
    #[arg(long, global = true)]
    pub events: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the config file and an empty store
    Init,

    /// Create, change and query tasks
    #[command(subcommand)]
    Task(TaskCommands),

    /// Inspect and manage note chains
    #[command(subcommand)]
    Note(NoteCommands),

    /// Poll the store and emit events for out-of-band changes
    Watch {
        /// Window length, e.g. "30s" (overrides watcher.period)
        #[arg(long)]
        period: Option<String>,

        /// Start the next window without waiting for reconciliations
        #[arg(long)]
        no_wait: bool,

        /// Reconcile a single window ending now, then exit
        #[arg(long)]
        once: bool,

        /// Start the first window this far in the past (overrides watcher.lookback)
        #[arg(long)]
        since: Option<String>,
    },
}

/// Fields shared by `task add` and `task update`
#[derive(clap::Args, Debug, Default, Clone)]
pub struct TaskFieldArgs {
    /// Longer description
    #[arg(long)]
    pub content: Option<String>,

    /// Workflow status
    #[arg(long)]
    pub status: Option<String>,

    /// Tag (repeatable); replaces existing tags
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Due date (RFC 3339)
    #[arg(long)]
    pub due: Option<String>,

    /// Start date (RFC 3339)
    #[arg(long)]
    pub start: Option<String>,

    /// Completion percentage, 0-100
    #[arg(long)]
    pub percent: Option<u8>,

    /// Mark done (true/false)
    #[arg(long)]
    pub done: Option<bool>,

    /// Extra field as key=value; JSON values are parsed
    #[arg(long = "extra")]
    pub extras: Vec<String>,

    /// Who made the change
    #[arg(long, env = "TASKNOTE_ACTOR")]
    pub by: Option<String>,
}

/// Task subcommands
#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Create a task
    Add {
        /// Task title
        title: String,

        #[command(flatten)]
        fields: TaskFieldArgs,
    },

    /// Change a task
    Update {
        /// Task ID
        id: String,

        /// New title
        #[arg(long)]
        title: Option<String>,

        #[command(flatten)]
        fields: TaskFieldArgs,
    },

    /// Deactivate a task (tasks are never removed)
    Delete {
        /// Task ID
        id: String,

        /// Who made the change
        #[arg(long, env = "TASKNOTE_ACTOR")]
        by: Option<String>,
    },

    /// Show a task and its head note
    Show {
        /// Task ID
        id: String,
    },

    /// List tasks
    List {
        /// Condition such as `status == "todo" & percent >= 50`
        #[arg(long = "where")]
        condition: Option<String>,

        /// Include inactive tasks
        #[arg(long)]
        all: bool,

        /// Field to sort by
        #[arg(long)]
        order_by: Option<String>,

        /// Sort descending
        #[arg(long)]
        desc: bool,

        /// Maximum number of tasks
        #[arg(long)]
        limit: Option<usize>,

        /// Tasks to skip
        #[arg(long)]
        offset: Option<usize>,
    },
}

/// Note subcommands
#[derive(Subcommand, Debug)]
pub enum NoteCommands {
    /// List a task's notes, oldest first
    List {
        /// Task ID
        task_id: String,

        /// Only notes matching this condition
        #[arg(long = "where")]
        condition: Option<String>,
    },

    /// Show one note
    Show {
        /// Note version
        #[arg(id = "note_version", value_name = "VERSION")]
        version: String,
    },

    /// Restore a task to a note and drop every later note
    Revert {
        /// Task ID
        task_id: String,

        /// Version to restore
        #[arg(id = "note_version", value_name = "VERSION")]
        version: String,
    },

    /// Delete a continuous run of notes
    Delete {
        /// Versions to delete
        #[arg(required = true)]
        versions: Vec<String>,

        /// Skip the continuity and follower checks
        #[arg(long)]
        force: bool,
    },
}

/// Global flags every command sees.
#[derive(Debug, Clone)]
pub(crate) struct GlobalArgs {
    pub root: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
    pub events: Option<String>,
}

/// Everything a command needs to talk to the store.
pub(crate) struct Context {
    pub root: PathBuf,
    pub config: Config,
    pub trigger: Trigger,
    pub output: OutputOptions,
    _sinks: Vec<Arc<SinkHandler>>,
}

impl Context {
    pub fn open(global: &GlobalArgs) -> Result<Self> {
        let root = resolve_root(global.root.clone())?;
        let config = Config::load_from_root(&root)?;
        let store = config.store_dir(&root);

        let manager = TaskManager::new(
            Arc::new(FileBackend::<Task>::in_dir(&store)),
            Arc::new(FileBackend::<Note>::in_dir(&store)),
        )
        .configured(&config);
        let events = Arc::new(LifecycleEvents::new());

        let destination = EventDestination::parse(global.events.as_deref());
        let sinks = match &destination {
            Some(destination) => events.attach_sink(Arc::new(destination.open()?)),
            None => Vec::new(),
        };
        let events_to_stdout = matches!(destination, Some(EventDestination::Stdout));

        Ok(Self {
            root,
            config,
            trigger: Trigger::new(Arc::new(manager), events),
            output: OutputOptions {
                json: global.json && !events_to_stdout,
                quiet: global.quiet || events_to_stdout,
            },
            _sinks: sinks,
        })
    }

    pub fn manager(&self) -> &Arc<TaskManager> {
        self.trigger.manager()
    }
}

pub(crate) fn resolve_root(root: Option<PathBuf>) -> Result<PathBuf> {
    match root {
        Some(path) => Ok(path),
        None => Ok(std::env::current_dir()?),
    }
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.dispatch())
    }

    async fn dispatch(self) -> Result<()> {
        let global = GlobalArgs {
            root: self.root,
            json: self.json,
            quiet: self.quiet,
            events: self.events,
        };

        match self.command {
            Commands::Init => init::run(&global),
            Commands::Task(cmd) => {
                let ctx = Context::open(&global)?;
                match cmd {
                    TaskCommands::Add { title, fields } => task::run_add(&ctx, title, fields).await,
                    TaskCommands::Update { id, title, fields } => {
                        task::run_update(&ctx, id, title, fields).await
                    }
                    TaskCommands::Delete { id, by } => task::run_delete(&ctx, id, by).await,
                    TaskCommands::Show { id } => task::run_show(&ctx, id).await,
                    TaskCommands::List {
                        condition,
                        all,
                        order_by,
                        desc,
                        limit,
                        offset,
                    } => {
                        task::run_list(
                            &ctx,
                            task::ListArgs {
                                condition,
                                all,
                                order_by,
                                desc,
                                limit,
                                offset,
                            },
                        )
                        .await
                    }
                }
            }
            Commands::Note(cmd) => {
                let ctx = Context::open(&global)?;
                match cmd {
                    NoteCommands::List { task_id, condition } => {
                        note::run_list(&ctx, task_id, condition).await
                    }
                    NoteCommands::Show { version } => note::run_show(&ctx, version).await,
                    NoteCommands::Revert { task_id, version } => {
                        note::run_revert(&ctx, task_id, version).await
                    }
                    NoteCommands::Delete { versions, force } => {
                        note::run_delete(&ctx, versions, force).await
                    }
                }
            }
            Commands::Watch {
                period,
                no_wait,
                once,
                since,
            } => {
                let ctx = Context::open(&global)?;
                watch::run(
                    &ctx,
                    watch::WatchArgs {
                        period,
                        no_wait,
                        once,
                        since,
                    },
                )
                .await
            }
        }
    }
}
