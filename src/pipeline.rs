//! Orchestration Controller
//!
//! Drives a full enhancement run: capability probe, scan, level plan, then a
//! sequential level loop with a strict barrier between levels. Files within a
//! level run as concurrent tasks gated by one global semaphore; within a file
//! every configured backend attempts concurrently and the file merges only
//! after all of its attempts resolve. Failures are isolated per backend and
//! per file; state is persisted after every level so a partial run still
//! leaves a usable scoreboard and decision record.

use crate::backend::{BackendPool, GenerateClient};
use crate::config::ReforgeConfig;
use crate::error::PipelineError;
use crate::executor::{GenerationAttempt, GenerationExecutor};
use crate::graph::{file_nodes, level_plan, FileStatus, LevelPlan};
use crate::merge::{ApprovalMode, MergeEngine, PatchDecision};
use crate::scanner::Scanner;
use crate::score::{composite_score, ScoreRecord, Scoreboard, Scorer};
use crate::state::{write_json_atomic, MemoryStore, StatePaths};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Outcome of one run.
#[derive(Debug)]
pub struct RunReport {
    pub decisions: BTreeMap<PathBuf, PatchDecision>,
    pub failed: BTreeSet<PathBuf>,
    pub levels: LevelPlan,
    pub scoreboard: BTreeMap<String, ScoreRecord>,
}

/// One scored candidate awaiting selection.
struct ScoredCandidate {
    attempt: GenerationAttempt,
    composite: f64,
}

/// The enhancement pipeline for one project root.
pub struct Pipeline<C: GenerateClient> {
    root: PathBuf,
    config: ReforgeConfig,
    client: Arc<C>,
    pool: BackendPool,
    executor: GenerationExecutor<C>,
    scorer: Scorer<C>,
    scoreboard: Arc<Scoreboard>,
    merge: MergeEngine,
    paths: StatePaths,
    memory: Mutex<MemoryStore>,
}

impl<C: GenerateClient> Pipeline<C> {
    /// Build a pipeline. Reads persisted state but mutates nothing on disk;
    /// all writes wait until the capability probe has passed.
    pub fn new(root: PathBuf, config: ReforgeConfig, client: Arc<C>) -> Result<Self, PipelineError> {
        let paths = StatePaths::new(root.clone());
        let pool = BackendPool::new(&config.backends);
        let executor = GenerationExecutor::new(
            Arc::clone(&client),
            Duration::from_secs(config.attempt_timeout_secs),
            paths.artifacts_dir(),
        );
        let scorer = Scorer::new(Arc::clone(&client), config.evaluator.clone());
        let scoreboard = Scoreboard::load(&paths.scoreboard())?;
        let memory = Mutex::new(MemoryStore::load(&paths.memory())?);
        let mode = if config.auto_approve {
            ApprovalMode::Auto
        } else {
            ApprovalMode::Interactive
        };
        let merge = MergeEngine::new(paths.backups_dir(), mode);

        Ok(Self {
            root,
            config,
            client,
            pool,
            executor,
            scorer,
            scoreboard,
            merge,
            paths,
            memory,
        })
    }

    /// Run the full enhancement pass.
    pub async fn process(&self) -> Result<RunReport, PipelineError> {
        // Probe first: an unreachable host aborts before any mutation.
        let models = self.client.probe().await?;
        info!(models = models.len(), "backend host reachable");
        for backend in self.pool.all() {
            let known = models
                .iter()
                .any(|m| m == &backend.id || m.starts_with(&format!("{}:", backend.id)));
            if !known {
                warn!(backend = %backend.id, "model not reported by host; attempts may fail");
            }
        }

        self.paths.ensure()?;

        let scanner = Scanner::new(self.root.clone(), self.config.ignore_patterns.clone());
        let graph = scanner.scan()?;
        // A strict-mode cycle rejection must leave no documents behind, so
        // planning happens before anything is persisted.
        let plan = level_plan(&graph, self.config.strict_cycles)?;
        write_json_atomic(&self.paths.graph(), &graph)?;
        write_json_atomic(&self.paths.levels(), &plan.levels)?;
        info!(
            files = plan.file_count(),
            levels = plan.levels.len(),
            cycle = plan.cycle,
            "run planned"
        );

        let nodes = Mutex::new(file_nodes(&graph, &plan));
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut decisions: BTreeMap<PathBuf, PatchDecision> = BTreeMap::new();

        for (index, level) in plan.levels.iter().enumerate() {
            info!(level = index, files = level.len(), "level started");

            let mut tasks = FuturesUnordered::new();
            for rel in level {
                let semaphore = Arc::clone(&semaphore);
                let nodes = &nodes;
                tasks.push(async move {
                    let _permit = match semaphore.acquire().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return (
                                rel.clone(),
                                Err(PipelineError::GenerationFailed {
                                    path: rel.clone(),
                                    backend: String::new(),
                                    reason: "scheduler shut down".to_string(),
                                }),
                            )
                        }
                    };
                    if let Some(node) = nodes.lock().get_mut(rel) {
                        node.status = FileStatus::Running;
                    }
                    let outcome = self.process_file(rel).await;
                    (rel.clone(), outcome)
                });
            }

            while let Some((rel, outcome)) = tasks.next().await {
                match outcome {
                    Ok(decision) => {
                        decisions.insert(rel.clone(), decision);
                        if let Some(node) = nodes.lock().get_mut(&rel) {
                            node.status = FileStatus::Done;
                        }
                    }
                    Err(e) => {
                        warn!(file = %rel.display(), error = %e, "file failed");
                        if let Some(node) = nodes.lock().get_mut(&rel) {
                            node.status = FileStatus::Failed;
                        }
                    }
                }
            }

            // Barrier: persist before the next level may observe this one.
            self.scoreboard.flush(&self.paths.scoreboard())?;
            self.memory.lock().save(&self.paths.memory())?;
            info!(level = index, "level complete");
        }

        let failed: BTreeSet<PathBuf> = nodes
            .lock()
            .iter()
            .filter(|(_, node)| node.status == FileStatus::Failed)
            .map(|(path, _)| path.clone())
            .collect();

        Ok(RunReport {
            decisions,
            failed,
            levels: plan,
            scoreboard: self.scoreboard.snapshot(),
        })
    }

    /// Process one file: fan out to all backends, score the survivors, merge
    /// the best candidate.
    async fn process_file(&self, rel: &Path) -> Result<PatchDecision, PipelineError> {
        let target = self.root.join(rel);
        let base = match std::fs::read_to_string(&target) {
            Ok(text) => text,
            Err(_) => {
                // Binary or unreadable content is scheduled but not enhanced.
                debug!(file = %rel.display(), "content not readable as text; skipping");
                return Ok(PatchDecision::Skipped);
            }
        };

        let memory_summary = self.memory.lock().get(rel).map(|e| e.summary.clone());
        let prompt = build_prompt(rel, &base, memory_summary.as_deref());

        let mut attempts = FuturesUnordered::new();
        for backend in self.pool.all() {
            let prompt = &prompt;
            attempts.push(async move { self.executor.run_attempt(rel, backend, prompt).await });
        }

        let mut completed: Vec<GenerationAttempt> = Vec::new();
        let mut last_error: Option<PipelineError> = None;
        while let Some(result) = attempts.next().await {
            match result {
                Ok(attempt) => completed.push(attempt),
                Err(e) => {
                    warn!(file = %rel.display(), error = %e, "attempt failed");
                    last_error = Some(e);
                }
            }
        }

        if completed.is_empty() {
            return Err(last_error.unwrap_or_else(|| PipelineError::GenerationFailed {
                path: rel.to_path_buf(),
                backend: String::new(),
                reason: "no backend produced output".to_string(),
            }));
        }

        let mut scored: Vec<ScoredCandidate> = Vec::with_capacity(completed.len());
        for attempt in completed {
            let signals = self
                .scorer
                .evaluate(
                    &attempt.backend_id,
                    &base,
                    &attempt.output,
                    memory_summary.as_deref(),
                )
                .await;
            let composite = composite_score(&signals, attempt.latency);
            self.scoreboard.record(
                &attempt.backend_id,
                composite,
                attempt.latency,
                attempt.output.len() as u64,
            );
            scored.push(ScoredCandidate { attempt, composite });
        }

        let Some(best) = self.select_best(scored) else {
            return Err(PipelineError::GenerationFailed {
                path: rel.to_path_buf(),
                backend: String::new(),
                reason: "no scored candidate".to_string(),
            });
        };
        debug!(
            file = %rel.display(),
            backend = %best.attempt.backend_id,
            score = best.composite,
            hash = %best.attempt.content_hash,
            "candidate selected"
        );

        let decision = self.merge.merge(&target, rel, &base, &best.attempt.output)?;
        info!(file = %rel.display(), decision = ?decision, "merge decided");

        if matches!(decision, PatchDecision::Applied | PatchDecision::Replaced) {
            self.scoreboard.mark_applied(&best.attempt.backend_id);
            self.memory.lock().record_update(rel, &best.attempt.output);
        }
        Ok(decision)
    }

    /// Highest composite wins; ties go to the backend ranked higher on the
    /// scoreboard (configured order when unranked).
    fn select_best(&self, mut scored: Vec<ScoredCandidate>) -> Option<ScoredCandidate> {
        let ranked = self.pool.ranked(|id| self.scoreboard.score_of(id));
        let rank_of = |id: &str| {
            ranked
                .iter()
                .position(|b| b.id == id)
                .unwrap_or(usize::MAX)
        };
        scored.sort_by(|a, b| {
            b.composite
                .partial_cmp(&a.composite)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| rank_of(&a.attempt.backend_id).cmp(&rank_of(&b.attempt.backend_id)))
        });
        scored.into_iter().next()
    }
}

fn build_prompt(rel: &Path, content: &str, memory_summary: Option<&str>) -> String {
    let memory = memory_summary.unwrap_or("(none)");
    format!(
        "Improve the following file. Preserve its meaning, structure, and \
         format while improving clarity, coherence, and completeness. \
         Return only the full improved file content, with no commentary.\n\
         File: {}\n\
         Prior enhancement note: {}\n\n\
         {}",
        rel.display(),
        memory,
        content
    )
}
