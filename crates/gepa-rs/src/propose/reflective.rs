use tracing::debug;

use crate::adapter::GepaAdapter;
use crate::error::ProposalError;
use crate::pareto::SCORE_EPSILON;
use crate::propose::{Proposal, ProposalFailure, RejectedAttempt};
use crate::state::{GepaState, ProposalTag};
use crate::strategies::{CandidateSelector, EpochShuffledBatchSampler, RoundRobinComponentSelector};

/// Single-parent mutation: evaluate the parent on a minibatch with traces,
/// distill the traces into a reflective dataset, ask the reflection LM for a
/// replacement component text, and judge the child on the same minibatch.
///
/// One `propose` call is one attempt. `None` means the attempt was abandoned
/// before a child existed (perfect parent with `skip_perfect_score`, or an
/// empty reflective dataset) — no trace entry, no child-side budget charge.
/// Failures past the parent evaluation return a [`ProposalFailure`] carrying
/// the parent's minibatch scores, so the engine can trace the rejection.
pub struct ReflectiveMutationProposer {
    perfect_score: f64,
    skip_perfect_score: bool,
}

impl ReflectiveMutationProposer {
    pub fn new(perfect_score: f64, skip_perfect_score: bool) -> Self {
        Self {
            perfect_score,
            skip_perfect_score,
        }
    }

    #[tracing::instrument(
        name = "gepa.proposer.reflective",
        level = "debug",
        skip_all,
        fields(iteration = state.iteration(), parent_idx = tracing::field::Empty)
    )]
    pub async fn propose<A: GepaAdapter>(
        &self,
        adapter: &A,
        trainset: &[A::Example],
        state: &mut GepaState<A::Output>,
        candidate_selector: &mut dyn CandidateSelector,
        component_selector: &mut RoundRobinComponentSelector,
        sampler: &mut EpochShuffledBatchSampler,
    ) -> Result<Option<Proposal>, ProposalFailure> {
        let iteration = state.iteration();

        let parent_idx = candidate_selector
            .select(state.pareto_fronts(), state.aggregate_scores(), iteration)
            .map_err(|err| ProposalFailure::bare(ProposalError::Evaluation { source: err.into() }))?;
        tracing::Span::current().record("parent_idx", parent_idx);
        let parent = state.candidate(parent_idx).clone();

        let indices = sampler.next_minibatch(trainset.len(), iteration);
        let minibatch: Vec<A::Example> =
            indices.iter().map(|&i| trainset[i].clone()).collect();

        let parent_eval = adapter
            .evaluate(&minibatch, &parent, true)
            .await
            .map_err(|source| ProposalFailure::bare(ProposalError::Evaluation { source }))?;
        parent_eval
            .check_shape(minibatch.len())
            .map_err(|err| ProposalFailure::bare(ProposalError::Evaluation { source: err.into() }))?;
        state.charge_evals(minibatch.len());
        let scores_before = parent_eval.scores.clone();

        // From here on the parent has minibatch scores: failures are traced.
        let rejected = |error: ProposalError| ProposalFailure {
            error,
            attempt: Some(RejectedAttempt {
                tag: ProposalTag::Reflective,
                parent_ids: vec![parent_idx],
                subsample_indices: indices.clone(),
                subsample_scores_before: scores_before.clone(),
            }),
        };

        if self.skip_perfect_score
            && scores_before
                .iter()
                .all(|&score| score >= self.perfect_score - SCORE_EPSILON)
        {
            debug!(parent_idx, "parent is perfect on the minibatch; skipping");
            return Ok(None);
        }

        let components = component_selector.select(&parent, parent_idx, iteration);

        let reflective = adapter
            .make_reflective_dataset(&parent, &parent_eval, &components)
            .map_err(|source| rejected(ProposalError::Reflection { source }))?;
        if components
            .iter()
            .all(|name| reflective.get(name).is_none_or(|examples| examples.is_empty()))
        {
            debug!(parent_idx, ?components, "empty reflective dataset; abandoning attempt");
            return Ok(None);
        }

        let new_texts = adapter
            .propose_new_texts(&parent, &reflective, &components)
            .await
            .map_err(|source| rejected(ProposalError::Lm { source }))?;
        let Some(component) = components.iter().find(|name| {
            new_texts
                .get(*name)
                .is_some_and(|text| !text.trim().is_empty())
        }) else {
            return Err(rejected(ProposalError::EmptyProposal {
                component: components.join(", "),
            }));
        };
        debug!(
            component = %component,
            text = crate::telemetry::span_text(&new_texts[component.as_str()]),
            "reflection proposed new text"
        );

        let child = parent.merge(&new_texts);

        let child_eval = adapter
            .evaluate(&minibatch, &child, false)
            .await
            .map_err(|source| rejected(ProposalError::Evaluation { source }))?;
        child_eval
            .check_shape(minibatch.len())
            .map_err(|err| rejected(ProposalError::Evaluation { source: err.into() }))?;
        state.charge_evals(minibatch.len());

        Ok(Some(Proposal {
            candidate: child,
            parent_ids: vec![parent_idx],
            subsample_indices: indices,
            subsample_scores_before: scores_before,
            subsample_scores_after: child_eval.scores,
            tag: ProposalTag::Reflective,
        }))
    }
}
