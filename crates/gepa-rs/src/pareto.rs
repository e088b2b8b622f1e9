//! Dominance and sampling over per-instance Pareto fronts.
//!
//! The key insight: optimizing for average score lets the search overfit to
//! easy validation examples while ignoring hard ones. Keeping, per validation
//! instance, the set of candidates tied for the best score preserves
//! specialists — a candidate that is mediocre on average but the only one to
//! crack instance #7 stays selectable alongside the high-average generalist.
//!
//! Parent selection samples from these fronts proportional to coverage (how
//! many instances a candidate wins on), after removing candidates that are
//! dominated everywhere they appear.

use std::collections::BTreeSet;

use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::error::GepaError;

/// Score comparisons tolerate this much floating-point noise.
pub(crate) const SCORE_EPSILON: f64 = 1e-6;

/// Arithmetic mean. `0.0` for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Smallest index attaining the maximum value. `None` on an empty slice.
///
/// The deterministic tie-break (first winner) is load-bearing: `best_idx`
/// must not depend on float comparison order or hash iteration.
pub fn idxmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, &value) in values.iter().enumerate() {
        match best {
            Some((_, best_value)) if value <= best_value => {}
            _ => best = Some((idx, value)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Removes candidates dominated on every front they participate in.
///
/// A candidate is *dominated* iff each front containing it also contains
/// another not-yet-dominated member. Removal is iterative: repeatedly drop
/// the dominated candidate with the lowest aggregate score (ties broken by
/// insertion order) until a fixpoint. Survivors are returned in ascending
/// index order.
pub fn remove_dominated_candidates(
    fronts: &[BTreeSet<usize>],
    aggregate_scores: &[f64],
) -> Vec<usize> {
    let mut alive: BTreeSet<usize> = fronts.iter().flatten().copied().collect();

    loop {
        let dominated: Vec<usize> = alive
            .iter()
            .copied()
            .filter(|&candidate| {
                let mut participates = false;
                for front in fronts {
                    if !front.contains(&candidate) {
                        continue;
                    }
                    participates = true;
                    if !front.iter().any(|&other| other != candidate && alive.contains(&other)) {
                        // Sole live member of this front: not dominated.
                        return false;
                    }
                }
                participates
            })
            .collect();

        let Some(victim) = dominated.into_iter().min_by(|&a, &b| {
            aggregate_scores[a]
                .partial_cmp(&aggregate_scores[b])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        }) else {
            break;
        };
        alive.remove(&victim);
    }

    alive.into_iter().collect()
}

/// Samples a parent candidate from the fronts, weighted by coverage.
///
/// After dominance removal, each survivor is weighted by the number of fronts
/// it appears in and one is drawn uniformly from the flattened multiset.
/// Well-rounded candidates get sampled more often; specialists that only win
/// one hard instance still get a chance.
///
/// # Errors
///
/// [`GepaError::EmptyParetoFront`] when every front is empty — impossible
/// once the archive state has been seeded.
pub fn select_program_candidate_from_pareto_front(
    fronts: &[BTreeSet<usize>],
    aggregate_scores: &[f64],
    rng: &mut StdRng,
) -> Result<usize, GepaError> {
    let survivors = remove_dominated_candidates(fronts, aggregate_scores);

    let weights: Vec<usize> = survivors
        .iter()
        .map(|candidate| fronts.iter().filter(|front| front.contains(candidate)).count())
        .collect();

    let total: usize = weights.iter().sum();
    if total == 0 {
        return Err(GepaError::EmptyParetoFront);
    }

    let mut target = rng.gen_range(0..total);
    for (&candidate, &weight) in survivors.iter().zip(weights.iter()) {
        if target < weight {
            return Ok(candidate);
        }
        target -= weight;
    }

    unreachable!("target < total by construction")
}

/// Snapshot of the frontier's shape at a point in the search.
///
/// Useful for plotting convergence: a healthy search keeps `num_candidates`
/// growing slowly while `avg_coverage` rises. A frontier of one candidate
/// means the search has converged (or collapsed).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParetoStatistics {
    /// Non-dominated candidates on the frontier.
    pub num_candidates: usize,
    /// Validation instances covered by at least one frontier candidate.
    pub num_examples_covered: usize,
    /// Mean instances won per frontier candidate.
    pub avg_coverage: f64,
    /// Most instances won by any single candidate.
    pub max_coverage: usize,
    /// Fewest instances won by any frontier candidate.
    pub min_coverage: usize,
}

/// Computes [`ParetoStatistics`] for the current fronts.
pub fn frontier_statistics(
    fronts: &[BTreeSet<usize>],
    aggregate_scores: &[f64],
) -> ParetoStatistics {
    let survivors = remove_dominated_candidates(fronts, aggregate_scores);
    let coverages: Vec<usize> = survivors
        .iter()
        .map(|candidate| fronts.iter().filter(|front| front.contains(candidate)).count())
        .collect();

    let num_examples_covered = fronts
        .iter()
        .filter(|front| front.iter().any(|member| survivors.contains(member)))
        .count();

    ParetoStatistics {
        num_candidates: survivors.len(),
        num_examples_covered,
        avg_coverage: if coverages.is_empty() {
            0.0
        } else {
            coverages.iter().sum::<usize>() as f64 / coverages.len() as f64
        },
        max_coverage: coverages.iter().copied().max().unwrap_or(0),
        min_coverage: coverages.iter().copied().min().unwrap_or(0),
    }
}
