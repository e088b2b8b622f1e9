use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bon::Builder;
use chrono::Utc;
use kdam::{BarExt, tqdm};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{EvaluationBatch, GepaAdapter};
use crate::candidate::Candidate;
use crate::error::GepaError;
use crate::pareto::{self, ParetoStatistics};
use crate::propose::{MergeProposer, Proposal, ProposalFailure, ReflectiveMutationProposer};
use crate::result::{GepaResult, StopReason};
use crate::state::{GepaState, ProposalTag, TraceEntry};
use crate::strategies::{
    CandidateSelector, CandidateSelectorStrategy, CurrentBestCandidateSelector,
    EpochShuffledBatchSampler, ParetoCandidateSelector, RoundRobinComponentSelector,
};
use crate::artifacts;

/// The GEPA optimization engine: a budgeted, Pareto-front-guided search over
/// candidate programs, mutated by LLM reflection and optionally recombined
/// by merge crossover.
///
/// One iteration: select a parent (coverage-weighted from the fronts, or
/// greedily), pick the next component round-robin, evaluate the parent on a
/// minibatch with traces, ask the reflection LM for a replacement text,
/// re-evaluate the child on the *same* minibatch, and accept only on strict
/// improvement. Accepted children earn a full validation evaluation and a
/// state update; each accepted reflective child also grants the merge
/// proposer one credit.
///
/// # Budget
///
/// Every adapter evaluation charges the budget by its example count; the
/// loop exits as soon as `total_num_evals ≥ max_metric_calls`. An in-flight
/// child is always finished (one-shot overrun permitted). The seed's
/// baseline evaluation runs before the first budget check, so even
/// `max_metric_calls = 0` yields a scored seed-only snapshot.
///
/// # Determinism
///
/// Given the same seed, datasets, and a deterministic adapter, two runs
/// produce identical archives, acceptance decisions, and snapshots. All
/// randomness flows from one seeded RNG, forked into the strategies in a
/// fixed order.
///
/// ```ignore
/// let result = GEPA::builder()
///     .max_metric_calls(600)
///     .minibatch_size(4)
///     .use_merge(true)
///     .build()
///     .run(&adapter, seed_candidate, &trainset, &valset)
///     .await?;
/// println!("best aggregate: {:.3}", result.best_aggregate());
/// ```
#[derive(Builder)]
pub struct GEPA {
    /// Hard budget on example-level metric evaluations.
    pub max_metric_calls: usize,

    /// Training examples judged per proposal.
    #[builder(default = 3)]
    pub minibatch_size: usize,

    /// Per-instance score at which nothing is left to learn.
    #[builder(default = 1.0)]
    pub perfect_score: f64,

    /// Abandon proposals whose parent is already perfect on the minibatch.
    #[builder(default = true)]
    pub skip_perfect_score: bool,

    /// How parents are selected.
    #[builder(default = CandidateSelectorStrategy::Pareto)]
    pub candidate_selector: CandidateSelectorStrategy,

    /// Enable the merge (crossover) proposer.
    #[builder(default = false)]
    pub use_merge: bool,

    /// Lifetime cap on merge credits.
    #[builder(default = 5)]
    pub max_merge_invocations: usize,

    /// RNG seed; the whole run is deterministic in it.
    #[builder(default = 0)]
    pub seed: u64,

    /// Artifact directory for best-output logs and the result snapshot.
    pub run_dir: Option<PathBuf>,

    /// Keep the per-instance best-outputs log (required for its artifacts).
    #[builder(default = false)]
    pub track_best_outputs: bool,

    /// Cosmetic only.
    #[builder(default = false)]
    pub display_progress_bar: bool,

    /// Cooperative cancellation, checked at suspension points.
    pub stop_flag: Option<Arc<AtomicBool>>,
}

impl GEPA {
    /// Runs the optimization loop to completion.
    ///
    /// # Errors
    ///
    /// Only pre-loop faults error out: empty datasets, an empty seed
    /// candidate, or a failed baseline evaluation. Everything after the
    /// baseline resolves into the snapshot's [`StopReason`].
    #[tracing::instrument(
        name = "gepa.engine.run",
        skip_all,
        fields(run_id = tracing::field::Empty, optimizer = "GEPA")
    )]
    pub async fn run<A: GepaAdapter>(
        &self,
        adapter: &A,
        seed_candidate: Candidate,
        trainset: &[A::Example],
        valset: &[A::Example],
    ) -> Result<GepaResult<A::Output>, GepaError> {
        if seed_candidate.is_empty() {
            return Err(GepaError::EmptySeedCandidate);
        }
        if trainset.is_empty() {
            return Err(GepaError::EmptyTrainset);
        }
        if valset.is_empty() {
            return Err(GepaError::EmptyValset);
        }

        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", run_id.to_string().as_str());

        let mut root_rng = StdRng::seed_from_u64(self.seed);
        let selector_rng = StdRng::seed_from_u64(root_rng.next_u64());
        let sampler_rng = StdRng::seed_from_u64(root_rng.next_u64());

        let candidate_selector: Box<dyn CandidateSelector> = match self.candidate_selector {
            CandidateSelectorStrategy::Pareto => {
                Box::new(ParetoCandidateSelector::new(selector_rng))
            }
            CandidateSelectorStrategy::CurrentBest => Box::new(CurrentBestCandidateSelector),
        };

        let baseline = self
            .full_evaluation(adapter, &seed_candidate, valset, run_id, 0)
            .await
            .map_err(|source| GepaError::BaselineEvaluation { source })?;
        baseline.check_shape(valset.len())?;

        let mut state = GepaState::initialize(
            seed_candidate,
            baseline.outputs,
            baseline.scores,
            self.track_best_outputs,
        );
        state.charge_evals(valset.len());
        if let (Some(run_dir), Some(log)) = (self.run_dir.as_deref(), state.best_outputs()) {
            for (instance, entries) in log.iter().enumerate() {
                if let Err(err) =
                    artifacts::persist_instance_best_outputs(run_dir, instance, entries)
                {
                    warn!(instance, error = %err, "failed to persist best outputs");
                }
            }
        }
        info!(
            run_id = %run_id,
            iteration = 0,
            optimizer = "GEPA",
            candidates = state.candidates().len(),
            "gepa.memory.updated"
        );

        let mut progress = self.display_progress_bar.then(|| {
            let mut bar = tqdm!(total = self.max_metric_calls, desc = "gepa");
            let _ = bar.update_to(state.total_num_evals());
            bar
        });

        let mut run = EngineLoop {
            cfg: self,
            adapter,
            trainset,
            valset,
            run_id,
            state,
            candidate_selector,
            component_selector: RoundRobinComponentSelector::new(),
            sampler: EpochShuffledBatchSampler::new(self.minibatch_size, sampler_rng),
            reflective: ReflectiveMutationProposer::new(
                self.perfect_score,
                self.skip_perfect_score,
            ),
            merge: MergeProposer::new(self.max_merge_invocations),
            evolution_history: Vec::new(),
            frontier_history: Vec::new(),
            last_iter_accepted: false,
        };

        let stop_reason = loop {
            if self.stop_requested() {
                break StopReason::Cancelled;
            }
            if run.state.total_num_evals() >= self.max_metric_calls {
                break StopReason::BudgetExhausted;
            }
            if run.state.perfect_on_every_instance(self.perfect_score) {
                break StopReason::PerfectScore;
            }

            let stop = run.run_iteration().await;
            if let Some(bar) = progress.as_mut() {
                let _ = bar.update_to(run.state.total_num_evals().min(self.max_metric_calls));
            }
            if let Some(reason) = stop {
                break reason;
            }
        };

        let result = run.into_result(stop_reason);
        info!(
            run_id = %run_id,
            optimizer = "GEPA",
            best_idx = result.best_idx,
            total_num_evals = result.total_num_evals,
            num_full_ds_evals = result.num_full_ds_evals,
            stop_reason = ?result.stop_reason,
            "gepa.engine.completed"
        );

        if let Some(run_dir) = self.run_dir.as_deref()
            && let Err(err) = artifacts::persist_result(run_dir, &result)
        {
            warn!(error = %err, "failed to persist result snapshot");
        }

        Ok(result)
    }

    fn stop_requested(&self) -> bool {
        self.stop_flag
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    #[tracing::instrument(
        name = "gepa.engine.full_evaluation",
        level = "debug",
        skip(self, adapter, candidate, valset),
        fields(optimizer = "GEPA")
    )]
    async fn full_evaluation<A: GepaAdapter>(
        &self,
        adapter: &A,
        candidate: &Candidate,
        valset: &[A::Example],
        run_id: Uuid,
        iteration: usize,
    ) -> anyhow::Result<EvaluationBatch<A::Trajectory, A::Output>> {
        adapter.evaluate(valset, candidate, false).await
    }
}

/// Mutable per-run machinery, split out so iteration spans wrap one method.
struct EngineLoop<'a, A: GepaAdapter> {
    cfg: &'a GEPA,
    adapter: &'a A,
    trainset: &'a [A::Example],
    valset: &'a [A::Example],
    run_id: Uuid,
    state: GepaState<A::Output>,
    candidate_selector: Box<dyn CandidateSelector>,
    component_selector: RoundRobinComponentSelector,
    sampler: EpochShuffledBatchSampler,
    reflective: ReflectiveMutationProposer,
    merge: MergeProposer,
    evolution_history: Vec<(usize, f64)>,
    frontier_history: Vec<ParetoStatistics>,
    last_iter_accepted: bool,
}

impl<A: GepaAdapter> EngineLoop<'_, A> {
    /// One pass of the state machine. `Some(reason)` breaks the loop.
    #[tracing::instrument(
        name = "gepa.engine.iteration",
        level = "debug",
        skip_all,
        fields(run_id = %self.run_id, iteration = self.state.iteration() + 1, optimizer = "GEPA")
    )]
    async fn run_iteration(&mut self) -> Option<StopReason> {
        let iteration = self.state.next_iteration();

        if self.cfg.use_merge && self.last_iter_accepted && self.merge.pending() {
            match self
                .merge
                .propose(self.adapter, self.trainset, &mut self.state, &mut self.sampler)
                .await
            {
                Ok(Some(proposal)) => return self.handle_proposal(proposal, iteration).await,
                Ok(None) => {}
                Err(failure) => {
                    self.proposal_failed(failure, iteration);
                    return None;
                }
            }
        }

        match self
            .reflective
            .propose(
                self.adapter,
                self.trainset,
                &mut self.state,
                self.candidate_selector.as_mut(),
                &mut self.component_selector,
                &mut self.sampler,
            )
            .await
        {
            Ok(Some(proposal)) => self.handle_proposal(proposal, iteration).await,
            Ok(None) => {
                debug!(iteration, "no proposal produced this iteration");
                self.last_iter_accepted = false;
                None
            }
            Err(failure) => {
                self.proposal_failed(failure, iteration);
                None
            }
        }
    }

    /// Applies the acceptance policy to a proposal from either operator.
    async fn handle_proposal(
        &mut self,
        proposal: Proposal,
        iteration: usize,
    ) -> Option<StopReason> {
        info!(
            run_id = %self.run_id,
            iteration,
            optimizer = "GEPA",
            tag = ?proposal.tag,
            parents = ?proposal.parent_ids,
            "gepa.proposer.candidate"
        );

        let entry = TraceEntry {
            iteration,
            tag: proposal.tag,
            parents: proposal.parent_ids.clone(),
            accepted: false,
            new_idx: None,
            subsample_indices: proposal.subsample_indices.clone(),
            subsample_scores_before: proposal.subsample_scores_before.clone(),
            subsample_scores_after: proposal.subsample_scores_after.clone(),
        };

        if !proposal.improved() {
            info!(
                run_id = %self.run_id,
                iteration,
                optimizer = "GEPA",
                tag = ?proposal.tag,
                before = pareto::mean(&proposal.subsample_scores_before),
                after = pareto::mean(&proposal.subsample_scores_after),
                "gepa.engine.rejected"
            );
            self.state.record_rejection(entry);
            self.last_iter_accepted = false;
            return None;
        }

        // Suspension point: a cancelled run skips the full evaluation.
        if self.cfg.stop_requested() {
            self.state.record_rejection(entry);
            return Some(StopReason::Cancelled);
        }

        let full_eval = match self
            .cfg
            .full_evaluation(self.adapter, &proposal.candidate, self.valset, self.run_id, iteration)
            .await
        {
            Ok(batch) => batch,
            Err(err) => {
                warn!(iteration, error = %format!("{err:#}"), "full evaluation failed; proposal dropped");
                self.last_iter_accepted = false;
                return None;
            }
        };
        if let Err(err) = full_eval.check_shape(self.valset.len()) {
            return Some(StopReason::InvariantViolation(err.to_string()));
        }
        self.state.charge_evals(self.valset.len());
        self.state.note_full_eval();

        let tag = proposal.tag;
        let (new_idx, best_idx) = self.state.update_state_with_new_program(
            proposal.parent_ids.clone(),
            proposal.candidate,
            full_eval.outputs,
            full_eval.scores,
            entry,
            self.cfg.run_dir.as_deref(),
        );
        if let Err(reason) = self.state.is_consistent() {
            return Some(StopReason::InvariantViolation(reason));
        }

        let aggregate = self.state.aggregate_scores()[new_idx];
        let best_aggregate = self.state.aggregate_scores()[best_idx];
        info!(
            run_id = %self.run_id,
            iteration,
            optimizer = "GEPA",
            parent_idx = ?proposal.parent_ids,
            new_idx,
            aggregate,
            best_idx,
            evals_used = self.state.total_num_evals(),
            "gepa.engine.accepted"
        );
        info!(
            run_id = %self.run_id,
            iteration,
            optimizer = "GEPA",
            candidates = self.state.candidates().len(),
            "gepa.memory.updated"
        );

        self.evolution_history.push((iteration, best_aggregate));
        self.frontier_history.push(pareto::frontier_statistics(
            self.state.pareto_fronts(),
            self.state.aggregate_scores(),
        ));

        if tag == ProposalTag::Reflective && self.cfg.use_merge {
            self.merge.schedule_if_needed();
        }
        self.last_iter_accepted = true;
        None
    }

    /// Applies the recovery policy to a failed attempt: reflection-side
    /// failures are rejections — traced when the parent's minibatch scores
    /// survived the failure — while evaluation failures are skipped without
    /// a trace entry.
    fn proposal_failed(&mut self, failure: ProposalFailure, iteration: usize) {
        let ProposalFailure { error, attempt } = failure;
        if error.is_rejection() {
            info!(
                run_id = %self.run_id,
                iteration,
                optimizer = "GEPA",
                error = %error,
                "gepa.engine.rejected"
            );
            if let Some(attempt) = attempt {
                self.state.record_rejection(TraceEntry {
                    iteration,
                    tag: attempt.tag,
                    parents: attempt.parent_ids,
                    accepted: false,
                    new_idx: None,
                    subsample_indices: attempt.subsample_indices,
                    subsample_scores_before: attempt.subsample_scores_before,
                    subsample_scores_after: Vec::new(),
                });
            }
        } else {
            warn!(iteration, error = %error, "proposal evaluation failed; skipping");
        }
        self.last_iter_accepted = false;
    }

    fn into_result(self, stop_reason: StopReason) -> GepaResult<A::Output> {
        let best_idx = self.state.best_idx();
        let best_candidate = self.state.candidate(best_idx).clone();
        GepaResult {
            candidates: self.state.candidates().to_vec(),
            parents: self.state.parents().to_vec(),
            aggregate_scores: self.state.aggregate_scores().to_vec(),
            per_instance_scores: self.state.per_instance_scores().to_vec(),
            pareto_front_scores: self.state.pareto_front_scores().to_vec(),
            per_instance_best_candidates: self.state.pareto_fronts().to_vec(),
            best_idx,
            best_candidate,
            trace: self.state.trace().to_vec(),
            evolution_history: self.evolution_history,
            frontier_history: self.frontier_history,
            best_outputs_valset: self.state.best_outputs().cloned(),
            num_full_ds_evals: self.state.num_full_ds_evals(),
            total_num_evals: self.state.total_num_evals(),
            seed: self.cfg.seed,
            run_dir: self.cfg.run_dir.clone(),
            stop_reason,
            run_id: self.run_id.to_string(),
            finished_at: Utc::now(),
        }
    }
}
