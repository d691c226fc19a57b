#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

/// A store root in a temp dir.
pub struct TestStore {
    dir: TempDir,
}

impl TestStore {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn store_dir(&self) -> PathBuf {
        self.dir.path().join(".tasknote")
    }

    pub fn tasks_path(&self) -> PathBuf {
        self.store_dir().join("tasks.json")
    }

    pub fn notes_path(&self) -> PathBuf {
        self.store_dir().join("notes.json")
    }

    pub fn write_config(&self, contents: &str) -> std::io::Result<PathBuf> {
        let path = self.dir.path().join(".tasknote.toml");
        fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn cmd(&self) -> Command {
        let mut cmd = tasknote_cmd();
        cmd.current_dir(self.path());
        cmd
    }

    /// Run with `--json` and return the envelope's `data`.
    pub fn json(&self, args: &[&str]) -> Value {
        let output = self
            .cmd()
            .args(args)
            .arg("--json")
            .output()
            .expect("run tasknote");
        assert!(
            output.status.success(),
            "tasknote {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        let envelope: Value = serde_json::from_slice(&output.stdout).expect("json envelope");
        assert_eq!(envelope["status"], "success");
        envelope["data"].clone()
    }

    pub fn add_task(&self, title: &str) -> String {
        let data = self.json(&["task", "add", title]);
        data["task"]["task_id"]
            .as_str()
            .expect("task_id")
            .to_string()
    }

    /// Rewrite `tasks.json` through `edit`, as a user editing the file would.
    pub fn edit_tasks(&self, edit: impl FnOnce(&mut Vec<Value>)) {
        let raw = fs::read_to_string(self.tasks_path()).expect("read tasks.json");
        let mut doc: Value = serde_json::from_str(&raw).expect("parse tasks.json");
        let records = doc["records"].as_array_mut().expect("records");
        edit(records);
        fs::write(
            self.tasks_path(),
            serde_json::to_string_pretty(&doc).expect("serialize"),
        )
        .expect("write tasks.json");
    }

    pub fn event_lines(stdout: &[u8]) -> Vec<Value> {
        String::from_utf8_lossy(stdout)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).expect("event line"))
            .collect()
    }
}

pub fn tasknote_cmd() -> Command {
    let mut cmd = Command::cargo_bin("tasknote").expect("binary");
    cmd.env_remove("TASKNOTE_ROOT");
    cmd.env_remove("TASKNOTE_ACTOR");
    cmd.env_remove("RUST_LOG");
    cmd
}
