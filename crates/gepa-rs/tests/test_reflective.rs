mod common;

use rand::SeedableRng;
use rand::rngs::StdRng;

use common::ScriptedAdapter;
use gepa_rs::{
    Candidate, CurrentBestCandidateSelector, EpochShuffledBatchSampler, GepaState, ProposalError,
    ProposalFailure, ProposalTag, ReflectiveMutationProposer, RoundRobinComponentSelector,
};

fn seeded_state(val_scores: &[f64]) -> GepaState<String> {
    GepaState::initialize(
        Candidate::from([("instruction", "base")]),
        val_scores.iter().map(|s| format!("seed-{s}")).collect(),
        val_scores.to_vec(),
        false,
    )
}

struct Harness {
    selector: CurrentBestCandidateSelector,
    components: RoundRobinComponentSelector,
    sampler: EpochShuffledBatchSampler,
    proposer: ReflectiveMutationProposer,
}

impl Harness {
    fn new(skip_perfect_score: bool) -> Self {
        Self {
            selector: CurrentBestCandidateSelector,
            components: RoundRobinComponentSelector::new(),
            sampler: EpochShuffledBatchSampler::new(1, StdRng::seed_from_u64(5)),
            proposer: ReflectiveMutationProposer::new(1.0, skip_perfect_score),
        }
    }

    async fn propose(
        &mut self,
        adapter: &ScriptedAdapter,
        trainset: &[usize],
        state: &mut GepaState<String>,
    ) -> Result<Option<gepa_rs::Proposal>, ProposalFailure> {
        state.next_iteration();
        self.proposer
            .propose(
                adapter,
                trainset,
                state,
                &mut self.selector,
                &mut self.components,
                &mut self.sampler,
            )
            .await
    }
}

#[tokio::test]
async fn improving_child_yields_an_accepted_proposal() {
    let adapter = ScriptedAdapter::new(&[("base", &[0.4, 0.5]), ("improved", &[0.6, 0.7])])
        .with_proposals(&[&[("instruction", "improved")]]);
    let mut state = seeded_state(&[0.5]);
    let mut harness = Harness::new(true);

    let proposal = harness
        .propose(&adapter, &[0], &mut state)
        .await
        .unwrap()
        .expect("proposal should be produced");

    assert_eq!(proposal.tag, ProposalTag::Reflective);
    assert_eq!(proposal.parent_ids, vec![0]);
    assert_eq!(proposal.subsample_indices, vec![0]);
    assert_eq!(proposal.subsample_scores_before, vec![0.4]);
    assert_eq!(proposal.subsample_scores_after, vec![0.6]);
    assert!(proposal.improved());
    assert_eq!(proposal.candidate.get("instruction"), Some("improved"));
    // Parent and child minibatch evaluations are both budget-charged.
    assert_eq!(state.total_num_evals(), 2);
}

#[tokio::test]
async fn tied_child_is_marked_rejected() {
    let adapter = ScriptedAdapter::new(&[("base", &[0.6]), ("same", &[0.6])])
        .with_proposals(&[&[("instruction", "same")]]);
    let mut state = seeded_state(&[0.6]);
    let mut harness = Harness::new(true);

    let proposal = harness
        .propose(&adapter, &[0], &mut state)
        .await
        .unwrap()
        .expect("proposal should be produced");

    assert!(!proposal.improved());
}

#[tokio::test]
async fn perfect_parent_is_skipped_without_child_charges() {
    let adapter = ScriptedAdapter::new(&[("base", &[1.0])])
        .with_proposals(&[&[("instruction", "unused")]]);
    let mut state = seeded_state(&[0.5]);
    let mut harness = Harness::new(true);

    let proposal = harness.propose(&adapter, &[0], &mut state).await.unwrap();

    assert!(proposal.is_none());
    assert_eq!(state.total_num_evals(), 1);
    assert_eq!(adapter.proposals.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn perfect_parent_still_mutates_when_skip_is_disabled() {
    let adapter = ScriptedAdapter::new(&[("base", &[1.0]), ("other", &[0.9])])
        .with_proposals(&[&[("instruction", "other")]]);
    let mut state = seeded_state(&[0.5]);
    let mut harness = Harness::new(false);

    let proposal = harness.propose(&adapter, &[0], &mut state).await.unwrap();

    assert!(proposal.is_some());
    assert!(!proposal.unwrap().improved());
}

#[tokio::test]
async fn empty_reflective_dataset_abandons_the_attempt() {
    let mut adapter = ScriptedAdapter::new(&[("base", &[0.4])])
        .with_proposals(&[&[("instruction", "unused")]]);
    adapter.empty_reflective = true;
    let mut state = seeded_state(&[0.5]);
    let mut harness = Harness::new(true);

    let proposal = harness.propose(&adapter, &[0], &mut state).await.unwrap();

    assert!(proposal.is_none());
    assert_eq!(adapter.proposals.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn reflection_failure_surfaces_as_a_rejection() {
    // No scripted proposals: the reflection call fails.
    let adapter = ScriptedAdapter::new(&[("base", &[0.4])]);
    let mut state = seeded_state(&[0.5]);
    let mut harness = Harness::new(true);

    let failure = harness
        .propose(&adapter, &[0], &mut state)
        .await
        .expect_err("reflection failure should propagate");

    assert!(matches!(failure.error, ProposalError::Lm { .. }));
    assert!(failure.error.is_rejection());
    // The parent's minibatch evidence survives for the engine to trace.
    let attempt = failure.attempt.expect("attempt context should be kept");
    assert_eq!(attempt.tag, ProposalTag::Reflective);
    assert_eq!(attempt.parent_ids, vec![0]);
    assert_eq!(attempt.subsample_indices, vec![0]);
    assert_eq!(attempt.subsample_scores_before, vec![0.4]);
}

#[tokio::test]
async fn evaluation_failure_is_not_budget_charged() {
    let adapter = ScriptedAdapter::new(&[("base", &[0.4])])
        .with_proposals(&[&[("instruction", "unused")]]);
    adapter.fail_evaluate_call(0);
    let mut state = seeded_state(&[0.5]);
    let mut harness = Harness::new(true);

    let failure = harness
        .propose(&adapter, &[0], &mut state)
        .await
        .expect_err("evaluation failure should propagate");

    assert!(matches!(failure.error, ProposalError::Evaluation { .. }));
    assert!(!failure.error.is_rejection());
    // The parent was never scored, so there is nothing to trace.
    assert!(failure.attempt.is_none());
    assert_eq!(state.total_num_evals(), 0);
}

#[tokio::test]
async fn blank_proposed_text_is_an_empty_proposal() {
    let adapter = ScriptedAdapter::new(&[("base", &[0.4])])
        .with_proposals(&[&[("instruction", "   ")]]);
    let mut state = seeded_state(&[0.5]);
    let mut harness = Harness::new(true);

    let failure = harness
        .propose(&adapter, &[0], &mut state)
        .await
        .expect_err("blank text should be rejected");

    assert!(matches!(failure.error, ProposalError::EmptyProposal { .. }));
    assert!(failure.attempt.is_some());
}
