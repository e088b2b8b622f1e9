use std::collections::{BTreeSet, HashSet};

use indexmap::IndexMap;
use tracing::debug;

use crate::adapter::GepaAdapter;
use crate::candidate::Candidate;
use crate::error::ProposalError;
use crate::propose::{Proposal, ProposalFailure};
use crate::state::{GepaState, ProposalTag};
use crate::strategies::EpochShuffledBatchSampler;

/// An eligible crossover: two candidates whose changes since their most
/// recent common ancestor touch disjoint component sets.
#[derive(Debug)]
struct MergePair {
    left: usize,
    right: usize,
    ancestor: usize,
    left_changed: BTreeSet<String>,
    right_changed: BTreeSet<String>,
    desirability: f64,
}

/// Two-parent crossover: when two descendants each improved *different*
/// components, compose both improvements into one candidate.
///
/// Scheduling is credit-based. Every accepted reflective proposal grants one
/// merge credit via [`schedule_if_needed`] (lifetime total capped by
/// `max_invocations`); the engine spends a credit at most once per iteration
/// and only when the previous iteration produced an accepted program. A
/// fruitless attempt (no eligible pair) keeps its credit.
///
/// [`schedule_if_needed`]: MergeProposer::schedule_if_needed
pub struct MergeProposer {
    max_invocations: usize,
    scheduled: usize,
    due: usize,
    performed: usize,
    produced: HashSet<u64>,
}

impl MergeProposer {
    pub fn new(max_invocations: usize) -> Self {
        Self {
            max_invocations,
            scheduled: 0,
            due: 0,
            performed: 0,
            produced: HashSet::new(),
        }
    }

    /// Grants a merge credit, unless the lifetime cap is already reached.
    pub fn schedule_if_needed(&mut self) {
        if self.scheduled < self.max_invocations {
            self.scheduled += 1;
            self.due += 1;
        }
    }

    /// Whether a credit is waiting to be spent.
    pub fn pending(&self) -> bool {
        self.due > 0
    }

    pub fn merges_performed(&self) -> usize {
        self.performed
    }

    /// Attempts one crossover. `None` when no eligible ancestor triple
    /// remains or every merged candidate was already produced; the credit is
    /// kept in that case.
    #[tracing::instrument(
        name = "gepa.proposer.merge",
        level = "debug",
        skip_all,
        fields(iteration = state.iteration())
    )]
    pub async fn propose<A: GepaAdapter>(
        &mut self,
        adapter: &A,
        trainset: &[A::Example],
        state: &mut GepaState<A::Output>,
        sampler: &mut EpochShuffledBatchSampler,
    ) -> Result<Option<Proposal>, ProposalFailure> {
        let iteration = state.iteration();

        let Some((pair, merged)) = self.find_mergeable_pair(state) else {
            debug!("no eligible merge pair");
            return Ok(None);
        };
        debug!(
            left = pair.left,
            right = pair.right,
            ancestor = pair.ancestor,
            left_changed = ?pair.left_changed,
            right_changed = ?pair.right_changed,
            "merging ancestor triple"
        );

        let indices = sampler.next_minibatch(trainset.len(), iteration);
        let minibatch: Vec<A::Example> =
            indices.iter().map(|&i| trainset[i].clone()).collect();

        // Baseline: the stronger parent per instance, so the merged child has
        // to beat the better of what it inherits from.
        let mut scores_before = Vec::with_capacity(minibatch.len());
        for parent_idx in [pair.left, pair.right] {
            let parent = state.candidate(parent_idx).clone();
            let eval = adapter
                .evaluate(&minibatch, &parent, false)
                .await
                .map_err(|source| ProposalFailure::bare(ProposalError::Evaluation { source }))?;
            eval.check_shape(minibatch.len()).map_err(|err| {
                ProposalFailure::bare(ProposalError::Evaluation { source: err.into() })
            })?;
            state.charge_evals(minibatch.len());
            if scores_before.is_empty() {
                scores_before = eval.scores;
            } else {
                for (slot, score) in scores_before.iter_mut().zip(eval.scores) {
                    *slot = slot.max(score);
                }
            }
        }

        let merged_eval = adapter
            .evaluate(&minibatch, &merged, false)
            .await
            .map_err(|source| ProposalFailure::bare(ProposalError::Evaluation { source }))?;
        merged_eval.check_shape(minibatch.len()).map_err(|err| {
            ProposalFailure::bare(ProposalError::Evaluation { source: err.into() })
        })?;
        state.charge_evals(minibatch.len());

        self.produced.insert(merged.fingerprint());
        self.due = self.due.saturating_sub(1);
        self.performed += 1;

        Ok(Some(Proposal {
            candidate: merged,
            parent_ids: vec![pair.left, pair.right],
            subsample_indices: indices,
            subsample_scores_before: scores_before,
            subsample_scores_after: merged_eval.scores,
            tag: ProposalTag::Merge,
        }))
    }

    /// Enumerates candidate pairs with a usable most-recent common ancestor,
    /// ranks them by combined aggregate score, and returns the best pair
    /// whose merged candidate is genuinely new.
    fn find_mergeable_pair<O: Clone + serde::Serialize>(
        &self,
        state: &GepaState<O>,
    ) -> Option<(MergePair, Candidate)> {
        let n = state.candidates().len();
        let aggregates = state.aggregate_scores();
        let ancestor_sets: Vec<BTreeSet<usize>> = (0..n).map(|idx| state.ancestors(idx)).collect();

        let mut pairs = Vec::new();
        for left in 0..n {
            for right in (left + 1)..n {
                let common = ancestor_sets[left]
                    .intersection(&ancestor_sets[right])
                    .copied()
                    .filter(|&p| p != left && p != right)
                    .max();
                let Some(ancestor) = common else { continue };

                let ancestor_candidate = state.candidate(ancestor);
                let left_changed = state.candidate(left).diff(ancestor_candidate);
                let right_changed = state.candidate(right).diff(ancestor_candidate);
                if left_changed.is_empty()
                    || right_changed.is_empty()
                    || !left_changed.is_disjoint(&right_changed)
                {
                    continue;
                }

                pairs.push(MergePair {
                    left,
                    right,
                    ancestor,
                    left_changed,
                    right_changed,
                    desirability: aggregates[left] + aggregates[right],
                });
            }
        }

        pairs.sort_by(|a, b| {
            b.desirability
                .partial_cmp(&a.desirability)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.left.cmp(&b.left))
                .then(a.right.cmp(&b.right))
        });

        for pair in pairs {
            let merged = self.compose(state, &pair);
            if &merged == state.candidate(pair.left) || &merged == state.candidate(pair.right) {
                continue;
            }
            if self.produced.contains(&merged.fingerprint()) {
                continue;
            }
            return Some((pair, merged));
        }
        None
    }

    /// Builds the merged candidate: each component takes the left parent's
    /// text if the left changed it, the right parent's if the right changed
    /// it, and the ancestor's otherwise.
    fn compose<O: Clone + serde::Serialize>(
        &self,
        state: &GepaState<O>,
        pair: &MergePair,
    ) -> Candidate {
        let ancestor = state.candidate(pair.ancestor);
        let left = state.candidate(pair.left);
        let right = state.candidate(pair.right);

        let components: IndexMap<String, String> = ancestor
            .iter()
            .map(|(name, ancestor_text)| {
                let text = if pair.left_changed.contains(name) {
                    left.get(name).unwrap_or(ancestor_text)
                } else if pair.right_changed.contains(name) {
                    right.get(name).unwrap_or(ancestor_text)
                } else {
                    ancestor_text
                };
                (name.to_string(), text.to_string())
            })
            .collect();
        Candidate::new(components)
    }
}
