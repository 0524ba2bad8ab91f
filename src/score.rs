//! Scorer & Adaptive Scoreboard
//!
//! Candidate outputs are meta-evaluated by a configured judge model which
//! returns three quality signals on a 0-100 scale. The composite score is the
//! mean of the signals minus a small latency penalty. Per-backend history is a
//! set of cumulative moving averages with no decay, persisted across runs; the
//! judge's opinion steers selection but is never treated as ground truth, so
//! an unparseable verdict degrades to neutral midpoints instead of failing
//! the file.

use crate::backend::GenerateClient;
use crate::error::StateError;
use crate::state::{read_json_or_default, write_json_atomic};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Neutral midpoint substituted for any signal the judge fails to supply.
const NEUTRAL_SIGNAL: f64 = 50.0;

/// Score points deducted per second of generation latency, capped.
const LATENCY_PENALTY_PER_SEC: f64 = 0.25;
const MAX_LATENCY_PENALTY: f64 = 10.0;

/// Quality signals from the meta-evaluation backend, each 0-100.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualitySignals {
    #[serde(default = "neutral")]
    pub coherence: f64,
    #[serde(default = "neutral")]
    pub improvement: f64,
    #[serde(default = "neutral")]
    pub memory_alignment: f64,
}

fn neutral() -> f64 {
    NEUTRAL_SIGNAL
}

impl Default for QualitySignals {
    fn default() -> Self {
        Self {
            coherence: NEUTRAL_SIGNAL,
            improvement: NEUTRAL_SIGNAL,
            memory_alignment: NEUTRAL_SIGNAL,
        }
    }
}

impl QualitySignals {
    fn clamped(self) -> Self {
        let clamp = |v: f64| v.clamp(0.0, 100.0);
        Self {
            coherence: clamp(self.coherence),
            improvement: clamp(self.improvement),
            memory_alignment: clamp(self.memory_alignment),
        }
    }

    pub fn mean(&self) -> f64 {
        (self.coherence + self.improvement + self.memory_alignment) / 3.0
    }
}

/// Composite score: mean quality minus a capped latency penalty.
pub fn composite_score(signals: &QualitySignals, latency: Duration) -> f64 {
    let penalty = (latency.as_secs_f64() * LATENCY_PENALTY_PER_SEC).min(MAX_LATENCY_PENALTY);
    signals.mean() - penalty
}

/// Cumulative per-backend history. Averages fold in new observations with
/// `new_avg = (old_avg * old_runs + value) / (old_runs + 1)`; no decay, so
/// long-lived backends converge slowly by design of the record shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScoreRecord {
    pub runs: u64,
    pub applied: u64,
    pub total_bytes: u64,
    pub avg_latency: f64,
    pub score: f64,
}

impl ScoreRecord {
    pub fn fold(&mut self, score: f64, latency: Duration, output_bytes: u64) {
        let old_runs = self.runs as f64;
        let new_runs = old_runs + 1.0;
        self.score = (self.score * old_runs + score) / new_runs;
        self.avg_latency = (self.avg_latency * old_runs + latency.as_secs_f64()) / new_runs;
        self.runs += 1;
        self.total_bytes += output_bytes;
    }
}

/// Persistent per-backend scoreboard. All mutation happens through the inner
/// lock; the lock is never held across an await point.
#[derive(Debug, Default)]
pub struct Scoreboard {
    records: Mutex<BTreeMap<String, ScoreRecord>>,
}

impl Scoreboard {
    pub fn load(path: &Path) -> Result<Arc<Self>, StateError> {
        let records: BTreeMap<String, ScoreRecord> = read_json_or_default(path)?;
        Ok(Arc::new(Self {
            records: Mutex::new(records),
        }))
    }

    /// Fold one scored attempt into the backend's record.
    pub fn record(&self, backend: &str, score: f64, latency: Duration, output_bytes: u64) {
        let mut records = self.records.lock();
        records
            .entry(backend.to_string())
            .or_default()
            .fold(score, latency, output_bytes);
    }

    /// Count one merge that applied this backend's candidate.
    pub fn mark_applied(&self, backend: &str) {
        let mut records = self.records.lock();
        records.entry(backend.to_string()).or_default().applied += 1;
    }

    /// Current average score for a backend, if it has history.
    pub fn score_of(&self, backend: &str) -> Option<f64> {
        let records = self.records.lock();
        records.get(backend).filter(|r| r.runs > 0).map(|r| r.score)
    }

    pub fn snapshot(&self) -> BTreeMap<String, ScoreRecord> {
        self.records.lock().clone()
    }

    /// Rewrite the persisted document from current state.
    pub fn flush(&self, path: &Path) -> Result<(), StateError> {
        let snapshot = self.snapshot();
        write_json_atomic(path, &snapshot)
    }
}

/// Meta-evaluation scorer bound to one judge model.
pub struct Scorer<C: GenerateClient> {
    client: Arc<C>,
    evaluator: String,
}

impl<C: GenerateClient> Scorer<C> {
    pub fn new(client: Arc<C>, evaluator: impl Into<String>) -> Self {
        Self {
            client,
            evaluator: evaluator.into(),
        }
    }

    /// Ask the judge model for quality signals on a candidate.
    ///
    /// Any failure here — request error, missing JSON, bad fields — degrades
    /// to neutral midpoints with a warning. Evaluation never fails a file.
    pub async fn evaluate(
        &self,
        backend: &str,
        original: &str,
        candidate: &str,
        memory_summary: Option<&str>,
    ) -> QualitySignals {
        let prompt = build_eval_prompt(original, candidate, memory_summary);
        let verdict = match self.client.chat(&self.evaluator, &prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(backend, error = %e, "evaluation request failed; using neutral scores");
                return QualitySignals::default();
            }
        };

        match parse_signals(&verdict) {
            Some(signals) => {
                debug!(
                    backend,
                    coherence = signals.coherence,
                    improvement = signals.improvement,
                    memory_alignment = signals.memory_alignment,
                    "candidate evaluated"
                );
                signals
            }
            None => {
                warn!(backend, "unparseable evaluation verdict; using neutral scores");
                QualitySignals::default()
            }
        }
    }
}

fn build_eval_prompt(original: &str, candidate: &str, memory_summary: Option<&str>) -> String {
    let memory = memory_summary.unwrap_or("(no prior enhancement recorded)");
    format!(
        "You are grading a proposed rewrite of a file.\n\
         Respond with ONLY a JSON object of the form\n\
         {{\"coherence\": <0-100>, \"improvement\": <0-100>, \"memory_alignment\": <0-100>}}\n\
         where coherence grades internal consistency of the rewrite,\n\
         improvement grades how much it improves on the original, and\n\
         memory_alignment grades consistency with the prior enhancement note.\n\n\
         Prior enhancement note: {}\n\n\
         --- ORIGINAL ---\n{}\n\n--- REWRITE ---\n{}\n",
        memory, original, candidate
    )
}

/// Extract the first JSON object from the verdict text and parse it
/// leniently; absent fields get neutral defaults.
fn parse_signals(verdict: &str) -> Option<QualitySignals> {
    let start = verdict.find('{')?;
    let end = verdict.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<QualitySignals>(&verdict[start..=end])
        .ok()
        .map(QualitySignals::clamped)
}
