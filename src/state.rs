//! Persisted State Documents
//!
//! Everything the pipeline remembers between runs lives as JSON under the
//! `<root>/.reforge/` state directory: the scanned graph, the level plan, the
//! backend scoreboard, and the per-file memory notes. Each document is read
//! fully at run start and rewritten fully after mutation; writes go through a
//! temp file plus rename so a crash never leaves a partially written document.
//! Missing or corrupt documents start empty rather than aborting the run.

use crate::error::StateError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Canonical locations of the state documents for one project root.
#[derive(Debug, Clone)]
pub struct StatePaths {
    root: PathBuf,
}

impl StatePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(".reforge")
    }

    pub fn graph(&self) -> PathBuf {
        self.state_dir().join("graph.json")
    }

    pub fn levels(&self) -> PathBuf {
        self.state_dir().join("levels.json")
    }

    pub fn scoreboard(&self) -> PathBuf {
        self.state_dir().join("scoreboard.json")
    }

    pub fn memory(&self) -> PathBuf {
        self.state_dir().join("memory.json")
    }

    /// Per-(file, backend) candidate outputs from the current run.
    pub fn artifacts_dir(&self) -> PathBuf {
        self.state_dir().join("outputs")
    }

    /// Pre-merge copies of original files.
    pub fn backups_dir(&self) -> PathBuf {
        self.state_dir().join("backups")
    }

    /// Create the state directory tree.
    pub fn ensure(&self) -> Result<(), StateError> {
        fs::create_dir_all(self.artifacts_dir())?;
        fs::create_dir_all(self.backups_dir())?;
        Ok(())
    }
}

/// Atomically write a serializable value as pretty JSON.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StateError> {
    let encoded = serde_json::to_vec_pretty(value).map_err(|e| StateError::Corrupt {
        path: path.to_path_buf(),
        reason: format!("serialization failed: {}", e),
    })?;
    write_atomic(path, &encoded)
}

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Atomically write raw bytes: temp file in the destination directory, then
/// rename over the target.
///
/// The temp name appends to the full file name and carries a per-process
/// unique suffix, so concurrent writers to sibling files sharing a stem
/// (`a.txt`, `a.json`) never race on one temp path, and a real file named
/// `<stem>.tmp` is never clobbered.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StateError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path.file_name().ok_or_else(|| StateError::Corrupt {
        path: path.to_path_buf(),
        reason: "path has no file name".to_string(),
    })?;
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let temp = path.with_file_name(format!(
        "{}.{}.{}.tmp",
        file_name.to_string_lossy(),
        std::process::id(),
        seq
    ));
    fs::write(&temp, bytes)?;
    if let Err(e) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(e.into());
    }
    Ok(())
}

/// Read a JSON document, tolerating absence and corruption.
///
/// A missing file is the empty/default document. A present but unparseable
/// file is logged and also treated as empty; the next successful run rewrites
/// it whole.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StateError> {
    if !path.exists() {
        return Ok(T::default());
    }
    let contents = fs::read_to_string(path)?;
    match serde_json::from_str(&contents) {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt state document; starting empty");
            Ok(T::default())
        }
    }
}

/// One memory note per enhanced file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// RFC 3339 timestamp of the last applied enhancement.
    pub last_update: String,
    /// First content line of the applied candidate, truncated.
    pub summary: String,
    pub tag: String,
}

const SUMMARY_MAX_CHARS: usize = 120;

/// Per-file memory notes; summaries feed the evaluator's memory-alignment
/// axis on subsequent runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStore {
    #[serde(default)]
    entries: BTreeMap<PathBuf, MemoryEntry>,
}

impl MemoryStore {
    pub fn load(path: &Path) -> Result<Self, StateError> {
        read_json_or_default(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        write_json_atomic(path, self)
    }

    pub fn get(&self, file: &Path) -> Option<&MemoryEntry> {
        self.entries.get(file)
    }

    /// Record an applied enhancement for a file.
    pub fn record_update(&mut self, file: &Path, content: &str) {
        let summary = summarize(content);
        self.entries.insert(
            file.to_path_buf(),
            MemoryEntry {
                last_update: chrono::Utc::now().to_rfc3339(),
                summary,
                tag: "enhanced".to_string(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// First non-empty line, truncated on a character boundary.
fn summarize(content: &str) -> String {
    let line = content
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    line.chars().take(SUMMARY_MAX_CHARS).collect()
}
