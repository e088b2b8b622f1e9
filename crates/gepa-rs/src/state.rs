//! Exclusive-owner archive of everything the search has learned.
//!
//! The state knows indices and scores, never what a candidate does. It is
//! mutated only by the engine; proposers and strategies read it. Ordering is
//! part of the contract: archive order equals acceptance order, trace order
//! equals proposal order (rejected proposals get a trace entry with no
//! archive append).

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::artifacts;
use crate::candidate::Candidate;
use crate::pareto::{self, SCORE_EPSILON};

/// Which operator produced a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalTag {
    Reflective,
    Merge,
}

/// One line of the proposal log: who was proposed from whom, on which
/// minibatch, with what before/after scores, and whether it was accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceEntry {
    pub iteration: usize,
    pub tag: ProposalTag,
    pub parents: Vec<usize>,
    pub accepted: bool,
    /// Archive index of the accepted candidate; `None` for rejections.
    pub new_idx: Option<usize>,
    pub subsample_indices: Vec<usize>,
    pub subsample_scores_before: Vec<f64>,
    pub subsample_scores_after: Vec<f64>,
}

/// Archive of candidates plus per-instance score bookkeeping.
///
/// Invariants, maintained by every update and checked by [`is_consistent`]:
///
/// - `|candidates| == |aggregate_scores| == |per_instance_scores| == |parents|`
/// - candidate `k` is in `fronts[i]` iff `per_instance_scores[k][i]` ties the
///   instance maximum (within epsilon)
/// - `front_scores[i]` never decreases
/// - the best-outputs log, when enabled, lists exactly the front members
///
/// [`is_consistent`]: GepaState::is_consistent
#[derive(Debug, Clone)]
pub struct GepaState<O> {
    candidates: Vec<Candidate>,
    parents: Vec<Vec<usize>>,
    aggregate_scores: Vec<f64>,
    per_instance_scores: Vec<Vec<f64>>,
    front_scores: Vec<f64>,
    fronts: Vec<BTreeSet<usize>>,
    trace: Vec<TraceEntry>,
    best_outputs: Option<Vec<Vec<(usize, O)>>>,
    iteration: usize,
    num_full_ds_evals: usize,
    total_num_evals: usize,
}

impl<O: Clone + Serialize> GepaState<O> {
    /// Seeds the archive with the initial candidate and its full-validation
    /// evaluation. Every per-instance front starts as `{0}`.
    pub fn initialize(
        seed_candidate: Candidate,
        outputs: Vec<O>,
        scores: Vec<f64>,
        track_best_outputs: bool,
    ) -> Self {
        let aggregate = pareto::mean(&scores);
        let fronts = vec![BTreeSet::from([0usize]); scores.len()];
        let best_outputs = track_best_outputs.then(|| {
            outputs
                .iter()
                .map(|output| vec![(0usize, output.clone())])
                .collect()
        });

        Self {
            candidates: vec![seed_candidate],
            parents: vec![Vec::new()],
            aggregate_scores: vec![aggregate],
            front_scores: scores.clone(),
            per_instance_scores: vec![scores],
            fronts,
            trace: Vec::new(),
            best_outputs,
            iteration: 0,
            num_full_ds_evals: 1,
            total_num_evals: 0,
        }
    }

    /// Appends an accepted candidate and folds its scores into the fronts.
    ///
    /// Per instance: a strictly better score replaces the front with the new
    /// index; a tie joins the existing set. When `run_dir` is set and the
    /// best-outputs log is enabled, updated instance directories are
    /// persisted (best-effort — a failed write is logged, never fatal).
    ///
    /// Returns `(new_idx, best_idx)` where `best_idx` maximizes the
    /// aggregate score over the whole archive.
    pub fn update_state_with_new_program(
        &mut self,
        parent_ids: Vec<usize>,
        candidate: Candidate,
        outputs: Vec<O>,
        scores: Vec<f64>,
        mut entry: TraceEntry,
        run_dir: Option<&Path>,
    ) -> (usize, usize) {
        let new_idx = self.candidates.len();
        self.candidates.push(candidate);
        self.parents.push(parent_ids);
        self.aggregate_scores.push(pareto::mean(&scores));

        for (instance, &score) in scores.iter().enumerate() {
            let front_score = self.front_scores[instance];
            let updated = if score > front_score + SCORE_EPSILON {
                self.front_scores[instance] = score;
                self.fronts[instance] = BTreeSet::from([new_idx]);
                if let Some(log) = self.best_outputs.as_mut() {
                    log[instance] = vec![(new_idx, outputs[instance].clone())];
                }
                true
            } else if (score - front_score).abs() <= SCORE_EPSILON {
                self.fronts[instance].insert(new_idx);
                if let Some(log) = self.best_outputs.as_mut() {
                    log[instance].push((new_idx, outputs[instance].clone()));
                }
                true
            } else {
                false
            };

            if updated
                && let (Some(dir), Some(log)) = (run_dir, self.best_outputs.as_ref())
                && let Err(err) = artifacts::persist_instance_best_outputs(dir, instance, &log[instance])
            {
                warn!(instance, error = %err, "failed to persist best outputs");
            }
        }

        self.per_instance_scores.push(scores);

        entry.accepted = true;
        entry.new_idx = Some(new_idx);
        self.trace.push(entry);

        let best_idx = pareto::idxmax(&self.aggregate_scores).unwrap_or(0);
        (new_idx, best_idx)
    }

    /// Records a proposal that was not accepted. No archive append.
    pub fn record_rejection(&mut self, mut entry: TraceEntry) {
        entry.accepted = false;
        entry.new_idx = None;
        self.trace.push(entry);
    }

    /// Verifies the front invariants and matrix shape.
    pub fn is_consistent(&self) -> Result<(), String> {
        let n = self.candidates.len();
        if self.aggregate_scores.len() != n
            || self.per_instance_scores.len() != n
            || self.parents.len() != n
        {
            return Err(format!(
                "archive shape mismatch: {n} candidates, {} aggregates, {} score rows, {} parent lists",
                self.aggregate_scores.len(),
                self.per_instance_scores.len(),
                self.parents.len(),
            ));
        }

        let instances = self.fronts.len();
        if self.front_scores.len() != instances {
            return Err(format!(
                "{instances} fronts but {} front scores",
                self.front_scores.len()
            ));
        }
        for (k, row) in self.per_instance_scores.iter().enumerate() {
            if row.len() != instances {
                return Err(format!(
                    "candidate {k} has {} instance scores, expected {instances}",
                    row.len()
                ));
            }
        }

        for instance in 0..instances {
            let max = self
                .per_instance_scores
                .iter()
                .map(|row| row[instance])
                .fold(f64::NEG_INFINITY, f64::max);
            if (self.front_scores[instance] - max).abs() > SCORE_EPSILON {
                return Err(format!(
                    "front score {} for instance {instance} does not match matrix max {max}",
                    self.front_scores[instance]
                ));
            }
            let front = &self.fronts[instance];
            if front.is_empty() {
                return Err(format!("front for instance {instance} is empty"));
            }
            for k in 0..n {
                let on_front = front.contains(&k);
                let at_max = (self.per_instance_scores[k][instance] - max).abs() <= SCORE_EPSILON;
                if on_front != at_max {
                    return Err(format!(
                        "candidate {k} front membership {on_front} disagrees with score {} (max {max}) on instance {instance}",
                        self.per_instance_scores[k][instance]
                    ));
                }
            }
            if let Some(log) = self.best_outputs.as_ref() {
                let logged: BTreeSet<usize> = log[instance].iter().map(|(k, _)| *k).collect();
                if &logged != front {
                    return Err(format!(
                        "best-outputs log {logged:?} disagrees with front {front:?} on instance {instance}"
                    ));
                }
            }
        }

        Ok(())
    }

    /// Whether every per-instance best score has reached `perfect_score`.
    pub fn perfect_on_every_instance(&self, perfect_score: f64) -> bool {
        self.front_scores
            .iter()
            .all(|&score| score >= perfect_score - SCORE_EPSILON)
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn candidate(&self, idx: usize) -> &Candidate {
        &self.candidates[idx]
    }

    pub fn parents(&self) -> &[Vec<usize>] {
        &self.parents
    }

    pub fn aggregate_scores(&self) -> &[f64] {
        &self.aggregate_scores
    }

    pub fn per_instance_scores(&self) -> &[Vec<f64>] {
        &self.per_instance_scores
    }

    pub fn pareto_fronts(&self) -> &[BTreeSet<usize>] {
        &self.fronts
    }

    pub fn pareto_front_scores(&self) -> &[f64] {
        &self.front_scores
    }

    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    pub fn best_outputs(&self) -> Option<&Vec<Vec<(usize, O)>>> {
        self.best_outputs.as_ref()
    }

    /// Index of the candidate with the best aggregate score.
    pub fn best_idx(&self) -> usize {
        pareto::idxmax(&self.aggregate_scores).unwrap_or(0)
    }

    /// All ancestors of `idx` (including `idx` itself) over the parent DAG.
    pub fn ancestors(&self, idx: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::from([idx]);
        let mut stack = vec![idx];
        while let Some(current) = stack.pop() {
            for &parent in &self.parents[current] {
                if seen.insert(parent) {
                    stack.push(parent);
                }
            }
        }
        seen
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Advances to the next iteration and returns its number (1-based).
    pub fn next_iteration(&mut self) -> usize {
        self.iteration += 1;
        self.iteration
    }

    pub fn num_full_ds_evals(&self) -> usize {
        self.num_full_ds_evals
    }

    pub fn total_num_evals(&self) -> usize {
        self.total_num_evals
    }

    /// Charges `count` example-level evaluations to the budget.
    pub fn charge_evals(&mut self, count: usize) {
        self.total_num_evals += count;
    }

    /// Records a full-validation pass (on top of its per-example charge).
    pub fn note_full_eval(&mut self) {
        self.num_full_ds_evals += 1;
    }
}
