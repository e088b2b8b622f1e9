//! Candidate-producing operators.
//!
//! Two ways a new candidate comes into being: [`reflective`] mutation (one
//! parent, an LLM rewrites one component's instruction based on evaluation
//! feedback) and [`merge`] crossover (two parents that improved *different*
//! components over a common ancestor are recombined). Both return a
//! [`Proposal`] carrying the minibatch evidence the engine's acceptance
//! policy judges.

pub mod instruction;
pub mod merge;
pub mod reflective;

pub use instruction::{ReflectionLm, extract_fenced_block, propose_new_texts_with_lm};
pub use merge::MergeProposer;
pub use reflective::ReflectiveMutationProposer;

use crate::candidate::Candidate;
use crate::error::ProposalError;
use crate::pareto;
use crate::state::ProposalTag;

/// A candidate proposal plus the minibatch evidence it was judged on.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub candidate: Candidate,
    pub parent_ids: Vec<usize>,
    pub subsample_indices: Vec<usize>,
    pub subsample_scores_before: Vec<f64>,
    pub subsample_scores_after: Vec<f64>,
    pub tag: ProposalTag,
}

impl Proposal {
    /// Strict-improvement test on the minibatch means. Ties fail — accepting
    /// equal-scoring children would let the archive drift without evidence.
    pub fn improved(&self) -> bool {
        pareto::mean(&self.subsample_scores_after) > pareto::mean(&self.subsample_scores_before)
    }
}

/// A failed proposal attempt, with whatever minibatch evidence existed at
/// the point of failure.
///
/// Failures before the parent minibatch evaluation carry no `attempt`;
/// reflection-side failures keep the parent's scores so the engine can
/// record the rejection in the proposal trace.
#[derive(Debug)]
pub struct ProposalFailure {
    pub error: ProposalError,
    pub attempt: Option<RejectedAttempt>,
}

/// The traceable remains of an attempt that died after the parent was
/// scored: which parent, on which minibatch, with what scores.
#[derive(Debug, Clone)]
pub struct RejectedAttempt {
    pub tag: ProposalTag,
    pub parent_ids: Vec<usize>,
    pub subsample_indices: Vec<usize>,
    pub subsample_scores_before: Vec<f64>,
}

impl ProposalFailure {
    /// A failure with no minibatch evidence to trace.
    pub fn bare(error: ProposalError) -> Self {
        Self {
            error,
            attempt: None,
        }
    }
}

impl From<ProposalError> for ProposalFailure {
    fn from(error: ProposalError) -> Self {
        Self::bare(error)
    }
}
