use thiserror::Error;

/// Fatal faults: the run cannot produce (or continue from) a consistent state.
///
/// Per-proposal trouble — a failing adapter evaluation, a reflection LM that
/// returns garbage — is *not* a [`GepaError`]; the engine recovers from those
/// locally (see [`ProposalError`]) and the loop keeps going.
#[derive(Debug, Error)]
pub enum GepaError {
    #[error("seed candidate evaluation on the validation set failed")]
    BaselineEvaluation {
        #[source]
        source: anyhow::Error,
    },

    #[error("adapter returned {got} {what} for a batch of {expected} examples")]
    BatchShape {
        expected: usize,
        got: usize,
        what: &'static str,
    },

    #[error("seed candidate has no components")]
    EmptySeedCandidate,

    #[error("validation set is empty")]
    EmptyValset,

    #[error("training set is empty")]
    EmptyTrainset,

    #[error("every Pareto frontier is empty; cannot sample a parent")]
    EmptyParetoFront,
}

/// Faults local to a single proposal attempt.
///
/// The engine maps these to its recovery policy: evaluation failures are
/// logged and skipped without charging the budget; reflection failures are
/// treated as rejected proposals.
#[derive(Debug, Error)]
pub enum ProposalError {
    #[error("adapter evaluation failed during a proposal")]
    Evaluation {
        #[source]
        source: anyhow::Error,
    },

    #[error("reflective dataset construction failed")]
    Reflection {
        #[source]
        source: anyhow::Error,
    },

    #[error("reflection LM call failed")]
    Lm {
        #[source]
        source: anyhow::Error,
    },

    #[error("reflection produced no usable instruction text for {component}")]
    EmptyProposal { component: String },
}

impl ProposalError {
    /// Whether the attempt counts as a *rejected proposal* (reflection-side
    /// trouble) as opposed to a skipped one (evaluation-side trouble).
    pub fn is_rejection(&self) -> bool {
        match self {
            Self::Evaluation { .. } => false,
            Self::Reflection { .. } | Self::Lm { .. } | Self::EmptyProposal { .. } => true,
        }
    }
}
