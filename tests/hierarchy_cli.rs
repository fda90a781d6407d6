mod support;

use std::fs;

use assert_cmd::Command;
use predicates::str::contains;

use support::TestDir;

fn plnr(dir: &TestDir) -> Command {
    support::plnr_cmd(dir)
}

fn seed_chain(dir: &TestDir) {
    for (id, parent) in [("a", None), ("b", Some("a")), ("c", Some("b")), ("d", Some("c"))] {
        let title = id.to_uppercase();
        let mut cmd = plnr(dir);
        cmd.args(["task", "new", title.as_str(), "--id", id]);
        if let Some(parent) = parent {
            cmd.args(["--parent", parent]);
        }
        cmd.assert().success();
    }
}

fn show(dir: &TestDir, id: &str) -> serde_json::Value {
    let output = plnr(dir)
        .args(["task", "show", id, "--json"])
        .output()
        .expect("run show");
    assert!(output.status.success());
    serde_json::from_slice(&output.stdout).expect("parse show output")
}

#[test]
fn depth_limit_is_enforced() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TestDir::new()?;
    seed_chain(&dir);

    plnr(&dir)
        .args(["task", "new", "E", "--id", "e", "--parent", "d"])
        .assert()
        .failure()
        .code(2)
        .stderr(contains("depth"));

    Ok(())
}

#[test]
fn completing_the_leaf_completes_the_chain() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TestDir::new()?;
    seed_chain(&dir);

    plnr(&dir)
        .args(["task", "set", "d", "--status", "done"])
        .assert()
        .success();

    for id in ["a", "b", "c"] {
        let envelope = show(&dir, id);
        assert_eq!(envelope["data"]["status"], "done", "task {id}");
        assert_eq!(envelope["data"]["progress_percentage"], 100, "task {id}");
    }

    Ok(())
}

#[test]
fn partial_completion_rounds_and_starts_parent() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TestDir::new()?;

    plnr(&dir).args(["task", "new", "P", "--id", "p"]).assert().success();
    for id in ["x", "y", "z"] {
        plnr(&dir)
            .args(["task", "new", id, "--id", id, "--parent", "p"])
            .assert()
            .success();
    }
    plnr(&dir)
        .args(["task", "bulk-set", "x", "y", "--status", "done"])
        .assert()
        .success();

    let envelope = show(&dir, "p");
    assert_eq!(envelope["data"]["progress_percentage"], 67);
    assert_eq!(envelope["data"]["status"], "in_progress");

    Ok(())
}

#[test]
fn move_updates_paths_and_rejects_cycles() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TestDir::new()?;
    seed_chain(&dir);
    plnr(&dir).args(["task", "new", "R", "--id", "r"]).assert().success();

    plnr(&dir)
        .args(["task", "move", "c", "--to", "r"])
        .assert()
        .success();
    let envelope = show(&dir, "d");
    assert_eq!(envelope["data"]["hierarchy_path"], "r/c/d");
    assert_eq!(envelope["data"]["hierarchy_level"], 2);

    plnr(&dir)
        .args(["task", "move", "r", "--to", "d"])
        .assert()
        .failure()
        .code(2)
        .stderr(contains("cycle"));

    Ok(())
}

#[test]
fn reorder_is_scoped_to_one_sibling_group() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TestDir::new()?;

    plnr(&dir).args(["task", "new", "P", "--id", "p"]).assert().success();
    for id in ["x", "y"] {
        plnr(&dir)
            .args(["task", "new", id, "--id", id, "--parent", "p"])
            .assert()
            .success();
    }

    plnr(&dir)
        .args(["task", "reorder", "y", "x", "--parent", "p"])
        .assert()
        .success();
    let envelope = show(&dir, "y");
    assert_eq!(envelope["data"]["sort_order"], 0);

    // "p" is not a child of "p".
    plnr(&dir)
        .args(["task", "reorder", "p", "x", "--parent", "p"])
        .assert()
        .failure()
        .code(2);

    Ok(())
}

#[test]
fn tree_renders_nested_tasks() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TestDir::new()?;
    seed_chain(&dir);

    plnr(&dir)
        .args(["task", "tree"])
        .assert()
        .success()
        .stdout(contains("- A"))
        .stdout(contains("  - B"))
        .stdout(contains("    - C"));

    Ok(())
}

#[test]
fn dependency_warnings_surface_on_create() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TestDir::new()?;

    plnr(&dir).args(["task", "new", "Base", "--id", "base"]).assert().success();
    plnr(&dir)
        .args(["task", "new", "Next", "--id", "next", "--depends-on", "base"])
        .assert()
        .success()
        .stdout(contains("unfinished"));

    plnr(&dir)
        .args(["task", "deps", "base"])
        .assert()
        .success()
        .stdout(contains("blocks next"));

    Ok(())
}

#[test]
fn events_stream_to_a_jsonl_file() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TestDir::new()?;
    let events_path = dir.path().join("events.jsonl");
    let events_arg = events_path.to_string_lossy().to_string();
    let events_arg = events_arg.as_str();

    plnr(&dir)
        .args(["task", "new", "A", "--id", "a", "--events", events_arg])
        .assert()
        .success();
    plnr(&dir)
        .args(["task", "new", "B", "--id", "b", "--parent", "a", "--events", events_arg])
        .assert()
        .success();
    plnr(&dir)
        .args([
            "task", "set", "b", "--status", "done", "--actor", "alice", "--events", events_arg,
        ])
        .assert()
        .success();

    let contents = fs::read_to_string(&events_path)?;
    let events: Vec<serde_json::Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).expect("parse event"))
        .collect();

    let kinds: Vec<&str> = events
        .iter()
        .map(|event| event["kind"].as_str().unwrap())
        .collect();
    assert_eq!(
        kinds,
        vec!["task_created", "task_created", "task_updated", "progress_updated"]
    );

    let updated = &events[2];
    assert_eq!(updated["actor_id"], "alice");
    assert_eq!(updated["schema_version"], "plnr.event.v1");
    let progressed = &events[3];
    assert_eq!(progressed["task_id"], "a");
    assert_eq!(progressed["progress"], 100);
    assert_eq!(progressed["status"], "done");

    Ok(())
}

#[test]
fn configured_max_depth_overrides_default() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TestDir::new()?;
    dir.write_config("[hierarchy]\nmax_depth = 1\n")?;

    plnr(&dir).args(["task", "new", "A", "--id", "a"]).assert().success();
    plnr(&dir)
        .args(["task", "new", "B", "--id", "b", "--parent", "a"])
        .assert()
        .success();
    plnr(&dir)
        .args(["task", "new", "C", "--id", "c", "--parent", "b"])
        .assert()
        .failure()
        .code(2);

    Ok(())
}
