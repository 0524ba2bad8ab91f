//! Failure isolation, capability fallback, and approval behavior.

use super::support::{test_config, ModelBehavior, ScriptedHost};
use reforge::merge::PatchDecision;
use reforge::pipeline::Pipeline;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn failing_backend_does_not_fail_the_file() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::write(root.join("a.txt"), "draft a\n").unwrap();
    std::fs::write(root.join("b.txt"), "draft b\n").unwrap();

    let host = ScriptedHost::new()
        .with_model("flaky", ModelBehavior::Fail)
        .with_model(
            "steady",
            ModelBehavior::Text("excellent steady rewrite\n".to_string()),
        )
        .arc();
    let pipeline = Pipeline::new(
        root.to_path_buf(),
        test_config(&["flaky", "steady"]),
        host,
    )
    .unwrap();

    let report = pipeline.process().await.unwrap();
    assert!(report.failed.is_empty());
    assert_eq!(report.decisions[Path::new("a.txt")], PatchDecision::Applied);
    assert_eq!(report.decisions[Path::new("b.txt")], PatchDecision::Applied);
    assert!(report.scoreboard.contains_key("steady"));
    assert!(!report.scoreboard.contains_key("flaky"));
}

#[tokio::test]
async fn every_backend_failing_marks_files_failed_but_finishes() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::write(root.join("a.txt"), "draft a\n").unwrap();
    std::fs::write(root.join("b.txt"), "draft b\n").unwrap();

    let host = ScriptedHost::new()
        .with_model("flaky", ModelBehavior::Fail)
        .arc();
    let pipeline =
        Pipeline::new(root.to_path_buf(), test_config(&["flaky"]), host).unwrap();

    let report = pipeline.process().await.unwrap();
    assert_eq!(report.failed.len(), 2);
    assert!(report.decisions.is_empty());
    // Originals untouched, state documents still written.
    assert_eq!(std::fs::read_to_string(root.join("a.txt")).unwrap(), "draft a\n");
    assert!(root.join(".reforge/levels.json").exists());
}

#[tokio::test]
async fn chat_only_backend_is_probed_for_streaming_once() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    // A chain so levels run one file at a time and the capability flag from
    // the first file governs the rest.
    std::fs::write(root.join("a.txt"), "draft a\n").unwrap();
    std::fs::write(root.join("b.txt"), "after \"a.txt\"\n").unwrap();
    std::fs::write(root.join("c.txt"), "after \"b.txt\"\n").unwrap();

    let host = ScriptedHost::new()
        .with_model(
            "legacy",
            ModelBehavior::ChatOnly("excellent chat rewrite\n".to_string()),
        )
        .arc();
    let pipeline = Pipeline::new(
        root.to_path_buf(),
        test_config(&["legacy"]),
        Arc::clone(&host),
    )
    .unwrap();

    let report = pipeline.process().await.unwrap();
    assert!(report.failed.is_empty());
    assert_eq!(report.decisions.len(), 3);
    assert!(report
        .decisions
        .values()
        .all(|d| *d == PatchDecision::Applied));
    // Streaming was attempted exactly once; the rejection was memoized.
    assert_eq!(host.stream_calls("legacy"), 1);
}

#[tokio::test]
async fn interactive_mode_without_terminal_declines_everything() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::write(root.join("a.txt"), "draft a\n").unwrap();

    let host = ScriptedHost::new()
        .with_model(
            "alpha",
            ModelBehavior::Text("excellent rewrite\n".to_string()),
        )
        .arc();
    let mut config = test_config(&["alpha"]);
    config.auto_approve = false;
    let pipeline = Pipeline::new(root.to_path_buf(), config, host).unwrap();

    let report = pipeline.process().await.unwrap();
    // Test runners have no interactive terminal: implicit decline.
    assert_eq!(report.decisions[Path::new("a.txt")], PatchDecision::Skipped);
    assert_eq!(std::fs::read_to_string(root.join("a.txt")).unwrap(), "draft a\n");
    // Attempts still ran and were scored.
    assert_eq!(report.scoreboard["alpha"].runs, 1);
    assert_eq!(report.scoreboard["alpha"].applied, 0);
}
