//! Dependency Graph & Level Scheduler
//!
//! The graph maps each file to the set of in-project files it references.
//! Leveling is a batched Kahn's algorithm: repeatedly extract every node with
//! no unresolved dependencies as one maximal level, so that a file's
//! dependencies always sit in strictly earlier levels. Same-level files carry
//! no ordering relative to each other beyond a stable lexicographic sort that
//! keeps repeated runs over an unchanged graph byte-identical.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use tracing::warn;

/// File path → set of referenced in-project file paths, both root-relative.
pub type DependencyGraph = BTreeMap<PathBuf, BTreeSet<PathBuf>>;

/// Processing status of one file within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    Pending,
    Running,
    Done,
    Failed,
}

/// One file in the scheduled graph. The level is assigned exactly once and
/// strictly exceeds the maximum level of the file's dependencies;
/// dependency-free files occupy level 0.
#[derive(Debug, Clone)]
pub struct FileNode {
    pub path: PathBuf,
    pub deps: BTreeSet<PathBuf>,
    pub level: usize,
    pub status: FileStatus,
}

/// Ordered levels produced by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelPlan {
    /// Levels in execution order; files within a level are sorted
    /// lexicographically.
    pub levels: Vec<Vec<PathBuf>>,
    /// True when a cycle forced the remainder into one unordered terminal
    /// level.
    pub cycle: bool,
}

impl LevelPlan {
    /// Total number of scheduled files.
    pub fn file_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }
}

/// Partition the graph into ordered levels.
///
/// Dependencies pointing at files missing from the graph (e.g. excluded from
/// the scan) are ignored for ordering rather than treated as edges. When no
/// remaining node has zero unresolved dependencies a cycle exists: the
/// remainder becomes one terminal level with no internal ordering guarantee,
/// or the run is rejected when `strict_cycles` is set.
pub fn level_plan(graph: &DependencyGraph, strict_cycles: bool) -> Result<LevelPlan, PipelineError> {
    // In-degree counts only edges to files present in the graph.
    let mut in_degree: BTreeMap<&PathBuf, usize> = BTreeMap::new();
    let mut dependents: HashMap<&PathBuf, Vec<&PathBuf>> = HashMap::new();
    for (file, deps) in graph {
        let known_deps = deps.iter().filter(|d| graph.contains_key(*d));
        let mut count = 0;
        for dep in known_deps {
            dependents.entry(dep).or_default().push(file);
            count += 1;
        }
        in_degree.insert(file, count);
    }

    let mut levels: Vec<Vec<PathBuf>> = Vec::new();
    let mut placed = 0usize;

    while placed < graph.len() {
        // BTreeMap iteration makes each extracted batch lexicographic.
        let ready: Vec<&PathBuf> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(file, _)| *file)
            .collect();

        if ready.is_empty() {
            let remaining: Vec<PathBuf> = in_degree.keys().map(|p| (*p).clone()).collect();
            if strict_cycles {
                return Err(PipelineError::CycleDetected(remaining.len()));
            }
            warn!(
                files = remaining.len(),
                "dependency cycle detected; emitting remainder as one unordered level"
            );
            levels.push(remaining);
            return Ok(LevelPlan { levels, cycle: true });
        }

        for file in &ready {
            in_degree.remove(*file);
            if let Some(deps) = dependents.get(*file) {
                for dependent in deps {
                    if let Some(deg) = in_degree.get_mut(*dependent) {
                        *deg = deg.saturating_sub(1);
                    }
                }
            }
        }

        placed += ready.len();
        levels.push(ready.into_iter().cloned().collect());
    }

    Ok(LevelPlan {
        levels,
        cycle: false,
    })
}

/// Materialize [`FileNode`]s with their assigned levels, all `Pending`.
pub fn file_nodes(graph: &DependencyGraph, plan: &LevelPlan) -> BTreeMap<PathBuf, FileNode> {
    let mut level_of: BTreeMap<&PathBuf, usize> = BTreeMap::new();
    for (index, level) in plan.levels.iter().enumerate() {
        for file in level {
            level_of.insert(file, index);
        }
    }

    graph
        .iter()
        .map(|(path, deps)| {
            (
                path.clone(),
                FileNode {
                    path: path.clone(),
                    deps: deps.clone(),
                    level: level_of.get(path).copied().unwrap_or(0),
                    status: FileStatus::Pending,
                },
            )
        })
        .collect()
}
