//! tasknote init command implementation
//!
//! Creates the config file and an empty store under the root.

use std::path::Path;

use crate::backend::FileBackend;
use crate::cli::{resolve_root, GlobalArgs};
use crate::config::{Config, CONFIG_FILE};
use crate::error::{Error, Result};
use crate::note::Note;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::task::Task;

#[derive(serde::Serialize)]
struct InitReport {
    root: std::path::PathBuf,
    store: std::path::PathBuf,
    created: InitCreated,
}

#[derive(serde::Serialize)]
struct InitCreated {
    config: bool,
    store_dir: bool,
    tasks: bool,
    notes: bool,
}

pub fn run(global: &GlobalArgs) -> Result<()> {
    let root = resolve_root(global.root.clone())?;
    ensure_dir(&root)?;

    let created_config = ensure_config(&root)?;
    let config = Config::load_from_root(&root)?;
    let store = config.store_dir(&root);
    let created_store_dir = ensure_dir(&store)?;

    let tasks = FileBackend::<Task>::in_dir(&store);
    let notes = FileBackend::<Note>::in_dir(&store);
    let created_tasks = !tasks.path().exists();
    let created_notes = !notes.path().exists();
    tasks.init()?;
    notes.init()?;

    let report = InitReport {
        root: root.clone(),
        store: store.clone(),
        created: InitCreated {
            config: created_config,
            store_dir: created_store_dir,
            tasks: created_tasks,
            notes: created_notes,
        },
    };

    let mut created_items = Vec::new();
    if created_config {
        created_items.push(CONFIG_FILE.to_string());
    }
    if created_tasks {
        created_items.push(tasks.path().display().to_string());
    }
    if created_notes {
        created_items.push(notes.path().display().to_string());
    }

    let header = if created_items.is_empty() {
        "tasknote init: nothing to do"
    } else {
        "tasknote init: initialized store"
    };

    let mut human = HumanOutput::new(header);
    human.field("root", root.display().to_string());
    human.field(
        "created",
        if created_items.is_empty() {
            "none".to_string()
        } else {
            created_items.join(", ")
        },
    );
    human.hint("tasknote task add \"<title>\"");
    human.hint("tasknote watch");

    emit_success(
        OutputOptions {
            json: global.json,
            quiet: global.quiet,
        },
        "init",
        &report,
        Some(&human),
    )
}

fn ensure_config(root: &Path) -> Result<bool> {
    let config_path = root.join(CONFIG_FILE);
    if config_path.exists() {
        if !config_path.is_file() {
            return Err(Error::OperationFailed(format!(
                "{CONFIG_FILE} exists but is not a file: {}",
                config_path.display()
            )));
        }
        return Ok(false);
    }

    Config::default().save(&config_path)?;
    Ok(true)
}

fn ensure_dir(path: &Path) -> Result<bool> {
    if path.exists() {
        if !path.is_dir() {
            return Err(Error::OperationFailed(format!(
                "Expected directory at {}",
                path.display()
            )));
        }
        return Ok(false);
    }

    std::fs::create_dir_all(path)?;
    Ok(true)
}
