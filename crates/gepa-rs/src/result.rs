use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::candidate::Candidate;
use crate::pareto::ParetoStatistics;
use crate::state::TraceEntry;

/// Why the optimization loop stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `total_num_evals` reached `max_metric_calls`.
    BudgetExhausted,
    /// Every per-instance best score reached `perfect_score`.
    PerfectScore,
    /// The cooperative stop flag was raised.
    Cancelled,
    /// A state invariant broke; the snapshot is the last consistent state.
    InvariantViolation(String),
}

/// Immutable snapshot of a finished (or aborted) run.
///
/// Always well-formed: whatever stopped the loop, the snapshot reflects the
/// last consistent archive state. Serializable as-is; when a run directory
/// is configured this is what lands in `result.json`.
#[derive(Debug, Clone, Serialize)]
pub struct GepaResult<O> {
    /// Archive in acceptance order; index 0 is the seed.
    pub candidates: Vec<Candidate>,
    /// Parent archive indices per candidate (empty for the seed).
    pub parents: Vec<Vec<usize>>,
    /// Mean validation score per candidate.
    pub aggregate_scores: Vec<f64>,
    /// Candidate-major score matrix over the validation set.
    pub per_instance_scores: Vec<Vec<f64>>,
    /// Best score seen per validation instance.
    pub pareto_front_scores: Vec<f64>,
    /// Candidates tied at the best score, per validation instance.
    pub per_instance_best_candidates: Vec<BTreeSet<usize>>,
    pub best_idx: usize,
    pub best_candidate: Candidate,
    /// Proposal log, in proposal order (rejections included).
    pub trace: Vec<TraceEntry>,
    /// `(iteration, best aggregate)` after each acceptance.
    pub evolution_history: Vec<(usize, f64)>,
    /// Frontier shape after each acceptance.
    pub frontier_history: Vec<ParetoStatistics>,
    /// Per instance, the `(candidate_idx, output)` pairs at the best score.
    /// `None` unless `track_best_outputs` was set.
    pub best_outputs_valset: Option<Vec<Vec<(usize, O)>>>,
    pub num_full_ds_evals: usize,
    pub total_num_evals: usize,
    pub seed: u64,
    pub run_dir: Option<PathBuf>,
    pub stop_reason: StopReason,
    pub run_id: String,
    pub finished_at: DateTime<Utc>,
}

impl<O> GepaResult<O> {
    /// The best aggregate score in the archive.
    pub fn best_aggregate(&self) -> f64 {
        self.aggregate_scores[self.best_idx]
    }

    /// Accepted candidates beyond the seed.
    pub fn num_accepted(&self) -> usize {
        self.candidates.len() - 1
    }
}
