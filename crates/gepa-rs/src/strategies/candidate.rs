use std::collections::BTreeSet;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::error::GepaError;
use crate::pareto;

/// Which parent-selection policy the engine should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSelectorStrategy {
    /// Coverage-weighted sampling from the per-instance Pareto fronts.
    #[default]
    Pareto,
    /// Always the candidate with the best aggregate score.
    CurrentBest,
}

/// Picks the parent for the next proposal.
pub trait CandidateSelector: Send {
    fn select(
        &mut self,
        fronts: &[BTreeSet<usize>],
        aggregate_scores: &[f64],
        iteration: usize,
    ) -> Result<usize, GepaError>;
}

/// Samples parents from the Pareto fronts, weighted by instance coverage.
pub struct ParetoCandidateSelector {
    rng: StdRng,
}

impl ParetoCandidateSelector {
    pub fn new(rng: StdRng) -> Self {
        Self { rng }
    }
}

impl CandidateSelector for ParetoCandidateSelector {
    #[tracing::instrument(
        name = "gepa.strategies.candidate_selector",
        level = "debug",
        skip(self, fronts, aggregate_scores),
        fields(strategy = "pareto", iteration, candidate_idx = tracing::field::Empty)
    )]
    fn select(
        &mut self,
        fronts: &[BTreeSet<usize>],
        aggregate_scores: &[f64],
        iteration: usize,
    ) -> Result<usize, GepaError> {
        let candidate_idx = pareto::select_program_candidate_from_pareto_front(
            fronts,
            aggregate_scores,
            &mut self.rng,
        )?;
        tracing::Span::current().record("candidate_idx", candidate_idx);
        Ok(candidate_idx)
    }
}

/// Greedy selection: the best aggregate wins every time.
pub struct CurrentBestCandidateSelector;

impl CandidateSelector for CurrentBestCandidateSelector {
    #[tracing::instrument(
        name = "gepa.strategies.candidate_selector",
        level = "debug",
        skip(self, fronts, aggregate_scores),
        fields(strategy = "current_best", iteration, candidate_idx = tracing::field::Empty)
    )]
    fn select(
        &mut self,
        fronts: &[BTreeSet<usize>],
        aggregate_scores: &[f64],
        iteration: usize,
    ) -> Result<usize, GepaError> {
        let _ = fronts;
        let candidate_idx =
            pareto::idxmax(aggregate_scores).ok_or(GepaError::EmptyParetoFront)?;
        tracing::Span::current().record("candidate_idx", candidate_idx);
        Ok(candidate_idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn pareto_selector_collapses_to_sole_survivor() {
        let fronts: Vec<BTreeSet<usize>> = vec![
            BTreeSet::from([0, 1]),
            BTreeSet::from([1, 2]),
        ];
        let mut selector = ParetoCandidateSelector::new(StdRng::seed_from_u64(123));
        let picked = selector.select(&fronts, &[0.4, 0.8, 0.6], 1).unwrap();
        assert_eq!(picked, 1);
    }

    #[test]
    fn current_best_breaks_ties_by_insertion_order() {
        let mut selector = CurrentBestCandidateSelector;
        let picked = selector.select(&[], &[0.3, 0.9, 0.9], 1).unwrap();
        assert_eq!(picked, 1);
    }
}
