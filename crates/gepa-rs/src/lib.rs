//! GEPA (Genetic-Pareto): reflective prompt optimization for LM programs.
//!
//! A *candidate* is nothing but a mapping from component name to instruction
//! text. GEPA evolves a population of candidates against a validation set:
//! an LLM rewrites one component at a time based on evaluation feedback
//! (reflective mutation), and two candidates that improved different
//! components can be recombined (merge). Selection is guided by per-instance
//! Pareto fronts rather than the average score alone, so specialists that
//! crack hard examples survive next to well-rounded generalists.
//!
//! # The mental model
//!
//! | Layer | Concept | Key types |
//! |-------|---------|-----------|
//! | **Contract** | How candidates are scored and reflected on | [`GepaAdapter`], [`EvaluationBatch`], [`ReflectiveDataset`] |
//! | **Search** | Archive, fronts, proposers, strategies | [`GepaState`], [`ReflectiveMutationProposer`], [`MergeProposer`] |
//! | **Driver** | Budgeted loop and its knobs | [`GEPA`], [`GepaResult`], [`StopReason`] |
//!
//! You implement [`GepaAdapter`] for your task — run a candidate over a
//! dataset slice, score each example, distill traces into reflection
//! records, call your reflection LM — and hand it to [`GEPA::run`]. The
//! engine owns everything else: parent selection, minibatch scheduling,
//! acceptance, budget accounting, and the result snapshot.
//!
//! # Quick start
//!
//! ```ignore
//! use gepa_rs::{Candidate, GEPA};
//!
//! let seed = Candidate::from([("instruction", "Answer the question.")]);
//!
//! let result = GEPA::builder()
//!     .max_metric_calls(600)
//!     .minibatch_size(4)
//!     .use_merge(true)
//!     .seed(42)
//!     .build()
//!     .run(&my_adapter, seed, &trainset, &valset)
//!     .await?;
//!
//! println!("{}", result.best_candidate.get("instruction").unwrap());
//! ```
//!
//! Runs are deterministic: same seed, same datasets, same (deterministic)
//! adapter — byte-identical archives and snapshots.
//!
//! # Crate organization
//!
//! - [`adapter`] — the [`GepaAdapter`] contract and evaluation types
//! - [`candidate`] — the [`Candidate`] component map
//! - [`engine`] — the [`GEPA`] driver and its configuration
//! - [`state`] — archive, score matrix, Pareto fronts, proposal trace
//! - [`pareto`] — dominance removal, coverage-weighted sampling
//! - [`strategies`] — parent/component/minibatch selection policies
//! - [`propose`] — reflective mutation, merge crossover, prompt helpers
//! - [`result`] — the [`GepaResult`] snapshot
//! - [`telemetry`] — optional console `tracing` setup and span-field
//!   conventions; the engine emits `gepa.*` spans and events either way

pub mod adapter;
mod artifacts;
pub mod candidate;
pub mod engine;
pub mod error;
pub mod pareto;
pub mod propose;
pub mod result;
pub mod state;
pub mod strategies;
pub mod telemetry;

pub use adapter::{EvaluationBatch, GepaAdapter, ReflectiveDataset, ReflectiveExample};
pub use candidate::Candidate;
pub use engine::GEPA;
pub use error::{GepaError, ProposalError};
pub use pareto::{
    ParetoStatistics, idxmax, remove_dominated_candidates,
    select_program_candidate_from_pareto_front,
};
pub use propose::{
    MergeProposer, Proposal, ProposalFailure, ReflectionLm, ReflectiveMutationProposer,
    RejectedAttempt, extract_fenced_block, propose_new_texts_with_lm,
};
pub use result::{GepaResult, StopReason};
pub use state::{GepaState, ProposalTag, TraceEntry};
pub use strategies::{
    CandidateSelector, CandidateSelectorStrategy, CurrentBestCandidateSelector,
    EpochShuffledBatchSampler, ParetoCandidateSelector, RoundRobinComponentSelector,
};
pub use telemetry::{init_tracing, init_tracing_with};
