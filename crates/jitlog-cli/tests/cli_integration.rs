//! Integration tests for the jitlog binary.
//!
//! Runs the built executable against the engine's fixture logs.

use std::path::PathBuf;
use std::process::{Command, Output};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../jitlog-engine/tests/fixtures")
        .join(name)
}

fn jitlog(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_jitlog"))
        .args(args)
        .arg("--color")
        .arg("never")
        .env_remove("JITLOG_LOG")
        .output()
        .expect("failed to run jitlog")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_summary() {
    let log = fixture("tiered.log");
    let output = jitlog(&["summary", log.to_str().unwrap()]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("OpenJDK 64-Bit Server VM"));
    assert!(text.contains("Orphan deopts"));
}

#[test]
fn test_summary_json() {
    let log = fixture("tiered.log");
    let output = jitlog(&["summary", log.to_str().unwrap(), "--json"]);
    assert!(output.status.success());
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["tasks"], 3);
    assert_eq!(stats["native_wrappers"], 1);
}

#[test]
fn test_tree_and_history() {
    let log = fixture("tiered.log");
    let tree = stdout(&jitlog(&["tree", log.to_str().unwrap(), "9"]));
    assert!(tree.contains("Foo huge (I)I"));
    assert!(tree.contains("hot method too big"));

    let history = stdout(&jitlog(&["history", log.to_str().unwrap(), "Foo bar"]));
    assert!(history.contains("*"));
    assert!(history.contains("invalidated"));
}

#[test]
fn test_correlate() {
    let log = fixture("tiered.log");
    let output = jitlog(&["correlate", log.to_str().unwrap(), "9"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("prologue"));
    assert!(text.contains("bci 4"));
    assert!(text.contains("line 11"));
}

#[test]
fn test_unknown_task_fails() {
    let log = fixture("tiered.log");
    let output = jitlog(&["tree", log.to_str().unwrap(), "404"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("404"));
}

#[test]
fn test_export_then_load() {
    let log = fixture("tiered.log");
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("tiered.json");
    let export = jitlog(&["export", log.to_str().unwrap(), "-o", snapshot.to_str().unwrap()]);
    assert!(export.status.success());
    assert!(snapshot.exists());

    let load = jitlog(&["load", snapshot.to_str().unwrap()]);
    assert!(load.status.success());
    assert!(stdout(&load).contains("Native wrappers"));
}

#[test]
fn test_top_lists() {
    let log = fixture("tiered.log");
    let all = jitlog(&["top", log.to_str().unwrap()]);
    assert!(all.status.success());
    let text = stdout(&all);
    assert!(text.contains("Largest native methods"));
    assert!(text.contains("Hot throws"));
    assert!(text.contains("_max"));

    let one = stdout(&jitlog(&["top", log.to_str().unwrap(), "slowest-compiles", "-n", "1"]));
    assert!(one.contains("#9"));
    assert!(!one.contains("#5"));

    let bad = jitlog(&["top", log.to_str().unwrap(), "hottest"]);
    assert!(!bad.status.success());
}

#[test]
fn test_optimisation_reports() {
    let log = fixture("tiered.log");
    let allocations = stdout(&jitlog(&["report", log.to_str().unwrap()]));
    assert!(allocations.contains("java/lang/Integer"));
    assert!(allocations.contains("inlined into Foo bar (I)V"));

    let locks = stdout(&jitlog(&["report", log.to_str().unwrap(), "locks"]));
    assert!(locks.contains("coarsened"));
}
