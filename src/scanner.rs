//! Reference Scanner
//!
//! Walks a project tree and extracts outgoing textual references per file via
//! pattern heuristics. A quoted path literal becomes a dependency edge only if
//! it resolves to an existing regular file inside the project; everything else
//! is silently dropped. The extraction strategy is pluggable and explicitly
//! heuristic: this is not import resolution, and false negatives are preferred
//! over false positives because a spurious edge can stall or misorder the
//! schedule. Scanning never mutates files.

use crate::error::PipelineError;
use crate::graph::DependencyGraph;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Strategy for extracting reference-like path literals from file content.
pub trait ReferenceExtractor: Send + Sync {
    /// Return candidate path literals found in `content`. Candidates are not
    /// required to resolve; the scanner drops anything that does not name an
    /// existing in-project file.
    fn extract(&self, content: &str) -> Vec<String>;
}

/// Default extractor: quoted path literals across several source conventions
/// (import/require/include/from/use statements, src/href attributes, and bare
/// relative paths with a file extension).
pub struct QuotedPathExtractor {
    patterns: Vec<Regex>,
}

impl Default for QuotedPathExtractor {
    fn default() -> Self {
        let patterns = [
            // import "x", require('x'), include "x", from "x", use "x"
            r#"(?:import|require|include|from|use)\s*\(?\s*["']([^"'\n]+)["']"#,
            // src="x", href="x"
            r#"(?:src|href)\s*=\s*["']([^"'\n]+)["']"#,
            // bare "./x" or "../x"
            r#"["'](\.{1,2}/[^"'\n]+)["']"#,
            // bare "path/to/file.ext"
            r#"["']([\w\-./]+\.[A-Za-z0-9]{1,8})["']"#,
        ]
        .iter()
        .map(|p| Regex::new(p).expect("built-in reference pattern must compile"))
        .collect();
        Self { patterns }
    }
}

impl ReferenceExtractor for QuotedPathExtractor {
    fn extract(&self, content: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        for pattern in &self.patterns {
            for capture in pattern.captures_iter(content) {
                if let Some(m) = capture.get(1) {
                    seen.insert(m.as_str().to_string());
                }
            }
        }
        seen.into_iter().collect()
    }
}

/// Scans a project root into a [`DependencyGraph`].
pub struct Scanner {
    root: PathBuf,
    ignore_patterns: Vec<String>,
    extractor: Box<dyn ReferenceExtractor>,
}

impl Scanner {
    /// Create a scanner with the default extraction strategy.
    pub fn new(root: PathBuf, ignore_patterns: Vec<String>) -> Self {
        Self {
            root,
            ignore_patterns,
            extractor: Box::new(QuotedPathExtractor::default()),
        }
    }

    /// Create a scanner with a custom extraction strategy.
    pub fn with_extractor(
        root: PathBuf,
        ignore_patterns: Vec<String>,
        extractor: Box<dyn ReferenceExtractor>,
    ) -> Self {
        Self {
            root,
            ignore_patterns,
            extractor,
        }
    }

    /// Scan every regular file under the root and build the dependency graph.
    ///
    /// Graph keys and dependency values are paths relative to the root, so
    /// repeated scans of an unchanged tree produce identical documents.
    pub fn scan(&self) -> Result<DependencyGraph, PipelineError> {
        let root = self.root.canonicalize().map_err(|e| {
            PipelineError::ConfigError(format!(
                "Project root {:?} is not accessible: {}",
                self.root, e
            ))
        })?;

        let mut files = Vec::new();
        let walker = WalkDir::new(&root).follow_links(false);
        for entry in walker {
            let entry = entry.map_err(|e| {
                PipelineError::ConfigError(format!("Failed to walk project tree: {}", e))
            })?;
            if self.should_ignore(&entry) {
                continue;
            }
            if entry.file_type().is_file() {
                files.push(entry.path().to_path_buf());
            }
        }
        files.sort();

        let mut graph = DependencyGraph::new();
        for file in &files {
            let rel = file
                .strip_prefix(&root)
                .unwrap_or(file.as_path())
                .to_path_buf();
            let deps = self.scan_file(&root, file)?;
            debug!(file = %rel.display(), deps = deps.len(), "scanned file");
            graph.insert(rel, deps);
        }

        Ok(graph)
    }

    /// Extract and resolve references for one file. Unreadable or non-UTF-8
    /// content yields no references; that is not an error.
    fn scan_file(&self, root: &Path, file: &Path) -> Result<BTreeSet<PathBuf>, PipelineError> {
        let content = match std::fs::read(file) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => return Ok(BTreeSet::new()),
            },
            Err(_) => return Ok(BTreeSet::new()),
        };

        let mut deps = BTreeSet::new();
        for literal in self.extractor.extract(&content) {
            if let Some(resolved) = resolve_reference(root, file, &literal) {
                if resolved != file {
                    if let Ok(rel) = resolved.strip_prefix(root) {
                        deps.insert(rel.to_path_buf());
                    }
                }
            }
        }
        Ok(deps)
    }

    fn should_ignore(&self, entry: &DirEntry) -> bool {
        for component in entry.path().components() {
            if let Component::Normal(name) = component {
                let name = name.to_string_lossy();
                if self.ignore_patterns.iter().any(|p| name == p.as_str()) {
                    return true;
                }
            }
        }
        false
    }
}

/// Resolve a path literal relative to the referencing file's directory, then
/// the project root. Returns a normalized absolute path only when it names an
/// existing regular file inside the project.
fn resolve_reference(root: &Path, referencing_file: &Path, literal: &str) -> Option<PathBuf> {
    let literal = literal.trim();
    if literal.is_empty() || literal.contains("://") || literal.starts_with('/') {
        return None;
    }

    let bases = [referencing_file.parent().unwrap_or(root), root];
    for base in bases {
        let candidate = normalize(&base.join(literal));
        if candidate.starts_with(root) && candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Lexical normalization of `.` and `..` components (no filesystem access).
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
