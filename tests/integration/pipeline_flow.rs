//! End-to-end runs over temporary project trees: ordering, cycle handling,
//! and persistence across runs.

use super::support::{test_config, ModelBehavior, ScriptedHost};
use reforge::error::PipelineError;
use reforge::merge::PatchDecision;
use reforge::pipeline::Pipeline;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const REWRITE: &str = "excellent unified rewrite\n";

fn host_with_alpha() -> ScriptedHost {
    ScriptedHost::new().with_model("alpha", ModelBehavior::Text(REWRITE.to_string()))
}

#[tokio::test]
async fn dependency_order_is_respected_and_persisted() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::write(root.join("intro.md"), "introduction\n").unwrap();
    std::fs::write(root.join("guide.md"), "builds on \"intro.md\"\n").unwrap();

    let pipeline = Pipeline::new(
        root.to_path_buf(),
        test_config(&["alpha"]),
        host_with_alpha().arc(),
    )
    .unwrap();
    let report = pipeline.process().await.unwrap();

    // The referenced file is leveled before its dependent.
    assert_eq!(
        report.levels.levels,
        vec![
            vec![PathBuf::from("intro.md")],
            vec![PathBuf::from("guide.md")]
        ]
    );
    assert!(!report.levels.cycle);
    assert!(report.failed.is_empty());
    assert_eq!(report.decisions.len(), 2);
    assert_eq!(std::fs::read_to_string(root.join("intro.md")).unwrap(), REWRITE);
    assert_eq!(std::fs::read_to_string(root.join("guide.md")).unwrap(), REWRITE);

    // Plan documents survive the run.
    let levels_doc = std::fs::read_to_string(root.join(".reforge/levels.json")).unwrap();
    let levels: Vec<Vec<String>> = serde_json::from_str(&levels_doc).unwrap();
    assert_eq!(
        levels,
        vec![vec!["intro.md".to_string()], vec!["guide.md".to_string()]]
    );
    assert!(root.join(".reforge/graph.json").exists());
}

#[tokio::test]
async fn cycle_degrades_to_terminal_level_and_still_processes() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::write(root.join("x.txt"), "see \"y.txt\"\n").unwrap();
    std::fs::write(root.join("y.txt"), "see \"x.txt\"\n").unwrap();
    std::fs::write(root.join("solo.txt"), "independent\n").unwrap();

    let pipeline = Pipeline::new(
        root.to_path_buf(),
        test_config(&["alpha"]),
        host_with_alpha().arc(),
    )
    .unwrap();
    let report = pipeline.process().await.unwrap();

    assert!(report.levels.cycle);
    assert_eq!(report.levels.levels[0], vec![PathBuf::from("solo.txt")]);
    // Cyclic files are still enhanced, just unordered among themselves.
    assert_eq!(report.decisions[Path::new("x.txt")], PatchDecision::Applied);
    assert_eq!(report.decisions[Path::new("y.txt")], PatchDecision::Applied);
}

#[tokio::test]
async fn strict_cycles_rejects_run_without_touching_files() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::write(root.join("x.txt"), "see \"y.txt\"\n").unwrap();
    std::fs::write(root.join("y.txt"), "see \"x.txt\"\n").unwrap();

    let mut config = test_config(&["alpha"]);
    config.strict_cycles = true;
    let pipeline = Pipeline::new(root.to_path_buf(), config, host_with_alpha().arc()).unwrap();

    let err = pipeline.process().await.unwrap_err();
    assert!(matches!(err, PipelineError::CycleDetected(2)));
    assert_eq!(
        std::fs::read_to_string(root.join("x.txt")).unwrap(),
        "see \"y.txt\"\n"
    );
    assert!(!root.join(".reforge/graph.json").exists());
}

#[tokio::test]
async fn scoreboard_and_memory_accumulate_across_runs() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::write(root.join("a.txt"), "first draft\n").unwrap();

    let first = Pipeline::new(
        root.to_path_buf(),
        test_config(&["alpha"]),
        host_with_alpha().arc(),
    )
    .unwrap();
    let first_report = first.process().await.unwrap();
    assert_eq!(first_report.scoreboard["alpha"].runs, 1);
    assert_eq!(first_report.scoreboard["alpha"].applied, 1);
    assert!(root.join(".reforge/memory.json").exists());

    // Second run: the candidate now matches the file, so nothing changes,
    // but history keeps accumulating from the persisted scoreboard.
    let second = Pipeline::new(
        root.to_path_buf(),
        test_config(&["alpha"]),
        host_with_alpha().arc(),
    )
    .unwrap();
    let second_report = second.process().await.unwrap();
    assert_eq!(
        second_report.decisions[Path::new("a.txt")],
        PatchDecision::NoChange
    );
    assert_eq!(second_report.scoreboard["alpha"].runs, 2);
    assert_eq!(second_report.scoreboard["alpha"].applied, 1);
}

#[tokio::test]
async fn probe_failure_leaves_tree_untouched() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::write(root.join("a.txt"), "content\n").unwrap();

    let host = ScriptedHost::new()
        .with_model("alpha", ModelBehavior::Text(REWRITE.to_string()))
        .unreachable();
    let pipeline = Pipeline::new(root.to_path_buf(), test_config(&["alpha"]), host.arc()).unwrap();

    let err = pipeline.process().await.unwrap_err();
    assert!(matches!(err, PipelineError::BackendUnreachable(_)));
    assert!(!root.join(".reforge").exists());
    assert_eq!(std::fs::read_to_string(root.join("a.txt")).unwrap(), "content\n");
}
