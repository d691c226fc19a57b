mod support;

use predicates::str::contains;
use serde_json::Value;

use support::TestStore;

#[test]
fn add_update_delete_round_trip() {
    let store = TestStore::new();
    let id = store.add_task("Write report");

    let updated = store.json(&["task", "update", &id, "--status", "doing", "--percent", "40"]);
    assert_eq!(updated["task"]["status"], "doing");
    assert_eq!(updated["task"]["percent"], 40);
    assert!(updated["previous"].is_string());

    let deleted = store.json(&["task", "delete", &id]);
    assert_eq!(deleted["task"]["active"], false);
    assert_eq!(deleted["previous"], updated["version"]);

    let shown = store.json(&["task", "show", &id]);
    assert_eq!(shown["task"]["active"], false);
    assert_eq!(shown["head"]["version"], deleted["version"]);
}

#[test]
fn list_hides_inactive_unless_all() {
    let store = TestStore::new();
    store.add_task("kept");
    let gone = store.add_task("gone");
    store.json(&["task", "delete", &gone]);

    let listed = store.json(&["task", "list"]);
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["tasks"][0]["title"], "kept");

    let everything = store.json(&["task", "list", "--all"]);
    assert_eq!(everything["total"], 2);
}

#[test]
fn list_where_filters_and_orders() {
    let store = TestStore::new();
    for (title, percent) in [("low", "10"), ("high", "90"), ("mid", "50")] {
        store.json(&["task", "add", title, "--percent", percent, "--tag", "work"]);
    }

    let listed = store.json(&[
        "task",
        "list",
        "--where",
        "percent >= 50 & tags contains \"work\"",
        "--order-by",
        "percent",
        "--desc",
    ]);
    let titles: Vec<&str> = listed["tasks"]
        .as_array()
        .expect("tasks")
        .iter()
        .filter_map(|task| task["title"].as_str())
        .collect();
    assert_eq!(titles, vec!["high", "mid"]);

    let limited = store.json(&["task", "list", "--order-by", "percent", "--limit", "1"]);
    assert_eq!(limited["tasks"][0]["title"], "low");
}

#[test]
fn list_where_on_extras() {
    let store = TestStore::new();
    store.json(&["task", "add", "a", "--extra", "points=3"]);
    store.json(&["task", "add", "b", "--extra", "points=8"]);

    let listed = store.json(&["task", "list", "--where", "extras.points > 5"]);
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["tasks"][0]["title"], "b");
}

#[test]
fn bad_condition_is_user_error() {
    let store = TestStore::new();
    store
        .cmd()
        .args(["task", "list", "--where", "colour == \"red\"", "--json"])
        .assert()
        .code(2)
        .stdout(contains("Unknown field 'colour'"))
        .stdout(contains("\"position\": 0"));
}

#[test]
fn unknown_task_is_user_error() {
    let store = TestStore::new();
    store
        .cmd()
        .args(["task", "show", "missing"])
        .assert()
        .code(2)
        .stderr(contains("Task not found"))
        .stderr(contains("hint: tasknote task list"));
}

#[test]
fn events_flag_writes_jsonl() {
    let store = TestStore::new();
    let output = store
        .cmd()
        .args(["--events", "-", "task", "add", "evented"])
        .output()
        .expect("run");
    assert!(output.status.success());

    let events = TestStore::event_lines(&output.stdout);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["schema_version"], "tasknote.event.v1");
    assert_eq!(events[0]["event"], "task_created");
    assert_eq!(events[0]["note"]["title"], "evented");
    assert!(events[0]["note"]["version"].is_string());
}

#[test]
fn events_file_collects_lifecycle() {
    let store = TestStore::new();
    let events_path = store.path().join("events.jsonl");
    let events_arg = events_path.to_string_lossy().to_string();

    let created = store.json(&["--events", &events_arg, "task", "add", "a"]);
    let id = created["task"]["task_id"].as_str().expect("id").to_string();
    store.json(&["--events", &events_arg, "task", "update", &id, "--title", "b"]);
    store.json(&["--events", &events_arg, "task", "delete", &id]);

    let raw = std::fs::read(&events_path).expect("events file");
    let kinds: Vec<Value> = TestStore::event_lines(&raw)
        .into_iter()
        .map(|event| event["event"].clone())
        .collect();
    assert_eq!(kinds, vec!["task_created", "task_updated", "task_deleted"]);
}
