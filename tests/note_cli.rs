mod support;

use predicates::str::contains;
use serde_json::Value;

use support::TestStore;

fn versions(data: &Value) -> Vec<String> {
    data["notes"]
        .as_array()
        .expect("notes")
        .iter()
        .filter_map(|note| note["version"].as_str().map(str::to_string))
        .collect()
}

/// A task with notes titled v0, v1, v2; returns (task id, versions).
fn three_notes(store: &TestStore) -> (String, Vec<String>) {
    let id = store.add_task("v0");
    store.json(&["task", "update", &id, "--title", "v1"]);
    store.json(&["task", "update", &id, "--title", "v2"]);
    let listed = store.json(&["note", "list", &id]);
    (id, versions(&listed))
}

#[test]
fn notes_form_a_chain() {
    let store = TestStore::new();
    let (id, chain) = three_notes(&store);
    assert_eq!(chain.len(), 3);

    let listed = store.json(&["note", "list", &id]);
    let notes = listed["notes"].as_array().expect("notes");
    assert!(notes[0]["previous"].is_null());
    assert_eq!(notes[1]["previous"], notes[0]["version"]);
    assert_eq!(notes[2]["previous"], notes[1]["version"]);

    let mut sorted = chain.clone();
    sorted.sort();
    assert_eq!(sorted, chain);
}

#[test]
fn note_list_where() {
    let store = TestStore::new();
    let (id, chain) = three_notes(&store);
    let listed = store.json(&["note", "list", &id, "--where", "title != \"v1\""]);
    assert_eq!(versions(&listed), vec![chain[0].clone(), chain[2].clone()]);
}

#[test]
fn revert_truncates_later_notes() {
    let store = TestStore::new();
    let (id, chain) = three_notes(&store);

    let reverted = store.json(&["note", "revert", &id, &chain[0]]);
    assert_eq!(reverted["title"], "v0");
    assert_eq!(reverted["previous"], chain[0].as_str());

    let listed = store.json(&["note", "list", &id]);
    let after = versions(&listed);
    assert_eq!(after.len(), 2);
    assert_eq!(after[0], chain[0]);

    let shown = store.json(&["task", "show", &id]);
    assert_eq!(shown["task"]["title"], "v0");
}

#[test]
fn delete_refuses_live_follower() {
    let store = TestStore::new();
    let (_, chain) = three_notes(&store);

    store
        .cmd()
        .args(["note", "delete", &chain[0]])
        .assert()
        .code(3)
        .stderr(contains("Chain integrity violation"));

    store
        .cmd()
        .args(["note", "delete", &chain[0], &chain[2]])
        .assert()
        .code(3);
}

#[test]
fn delete_continuous_tail_and_force() {
    let store = TestStore::new();
    let (id, chain) = three_notes(&store);

    store.json(&["note", "delete", &chain[1], &chain[2]]);
    assert_eq!(versions(&store.json(&["note", "list", &id])), vec![chain[0].clone()]);

    let (other, other_chain) = three_notes(&store);
    store.json(&["note", "delete", &other_chain[0], "--force"]);
    assert_eq!(
        versions(&store.json(&["note", "list", &other])),
        other_chain[1..].to_vec()
    );
}

#[test]
fn eviction_keeps_configured_maximum() {
    let store = TestStore::new();
    store
        .write_config("[notes]\nmax_notes = 2\n")
        .expect("write config");
    let (id, chain) = three_notes(&store);

    assert_eq!(chain.len(), 2);
    let listed = store.json(&["note", "list", &id]);
    assert_eq!(listed["notes"][0]["title"], "v1");
    assert_eq!(listed["notes"][1]["title"], "v2");
}

#[test]
fn show_unknown_note_is_user_error() {
    let store = TestStore::new();
    store
        .cmd()
        .args(["note", "show", "01ARZ3NDEKTSV4RRFFQ69G5FAV"])
        .assert()
        .code(2)
        .stderr(contains("Note not found"));
}
