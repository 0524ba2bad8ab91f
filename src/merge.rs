//! Merge Engine
//!
//! Folds the winning candidate back into the original file. The original is
//! backed up before any write. The candidate is applied as a line-level patch
//! computed against the content the generation saw; when that base has gone
//! stale and the patch no longer applies, the engine falls back to a guarded
//! whole-file replacement with the backup as the recovery path. Interactive
//! mode shows the diff and requires explicit confirmation; a non-interactive
//! session counts as a decline, never an implicit approval.

use crate::error::PipelineError;
use crate::state::write_atomic;
use diffy::{apply, create_patch};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// How merges are approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalMode {
    /// Apply without asking.
    Auto,
    /// Show the diff and ask for confirmation per file.
    Interactive,
}

/// Outcome of one merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchDecision {
    /// Candidate matched the current content; file untouched.
    NoChange,
    /// Patch applied cleanly.
    Applied,
    /// Patch did not apply against current content; whole file swapped for
    /// the candidate, backup preserved.
    Replaced,
    /// Declined (or undecidable) in interactive mode; file untouched.
    Skipped,
}

/// Merges candidates into target files with backup and approval.
pub struct MergeEngine {
    backups_dir: PathBuf,
    mode: ApprovalMode,
}

impl MergeEngine {
    pub fn new(backups_dir: PathBuf, mode: ApprovalMode) -> Self {
        Self { backups_dir, mode }
    }

    /// Merge `candidate` into the file at `target`.
    ///
    /// `base` is the content the generation was prompted with; the patch is
    /// computed `base -> candidate` and applied to whatever the file holds at
    /// merge time. `rel` names the file in logs, prompts, and backups.
    pub fn merge(
        &self,
        target: &Path,
        rel: &Path,
        base: &str,
        candidate: &str,
    ) -> Result<PatchDecision, PipelineError> {
        if !target.exists() {
            if !self.approve(rel, &format!("(new file)\n{}", candidate)) {
                return Ok(PatchDecision::Skipped);
            }
            self.write_target(target, rel, candidate)?;
            info!(file = %rel.display(), "candidate written to new file");
            return Ok(PatchDecision::Applied);
        }

        let current = fs::read_to_string(target).map_err(|e| PipelineError::MergeFailed {
            path: rel.to_path_buf(),
            reason: format!("failed to read current content: {}", e),
        })?;

        if candidate == current {
            return Ok(PatchDecision::NoChange);
        }
        if candidate == base {
            // The backend handed back exactly what it was shown; nothing to
            // offer over the current content.
            return Ok(PatchDecision::NoChange);
        }

        let patch = create_patch(base, candidate);

        if !self.approve(rel, &patch.to_string()) {
            info!(file = %rel.display(), "merge declined");
            return Ok(PatchDecision::Skipped);
        }

        self.backup(rel, &current)?;

        match apply(&current, &patch) {
            Ok(merged) => {
                self.write_target(target, rel, &merged)?;
                info!(file = %rel.display(), "patch applied");
                Ok(PatchDecision::Applied)
            }
            Err(e) => {
                warn!(
                    file = %rel.display(),
                    error = %e,
                    "patch does not apply to current content; replacing whole file"
                );
                self.write_target(target, rel, candidate)?;
                Ok(PatchDecision::Replaced)
            }
        }
    }

    fn approve(&self, rel: &Path, diff: &str) -> bool {
        match self.mode {
            ApprovalMode::Auto => true,
            ApprovalMode::Interactive => {
                if !std::io::stdin().is_terminal() {
                    info!(
                        file = %rel.display(),
                        "no interactive terminal; declining merge"
                    );
                    return false;
                }
                println!("--- proposed change for {} ---", rel.display());
                println!("{}", diff);
                dialoguer::Confirm::new()
                    .with_prompt(format!("Apply change to {}?", rel.display()))
                    .default(false)
                    .interact()
                    .unwrap_or(false)
            }
        }
    }

    fn backup(&self, rel: &Path, current: &str) -> Result<(), PipelineError> {
        let name = format!("{}.bak", rel.to_string_lossy().replace(['/', '\\'], "_"));
        let backup_path = self.backups_dir.join(name);
        write_atomic(&backup_path, current.as_bytes()).map_err(|e| PipelineError::MergeFailed {
            path: rel.to_path_buf(),
            reason: format!("failed to write backup: {}", e),
        })
    }

    fn write_target(&self, target: &Path, rel: &Path, content: &str) -> Result<(), PipelineError> {
        write_atomic(target, content.as_bytes()).map_err(|e| PipelineError::MergeFailed {
            path: rel.to_path_buf(),
            reason: format!("failed to write merged content: {}", e),
        })
    }
}
