mod common;

use rand::SeedableRng;
use rand::rngs::StdRng;

use common::ScriptedAdapter;
use gepa_rs::{
    Candidate, EpochShuffledBatchSampler, GepaState, MergeProposer, ProposalTag, TraceEntry,
};

fn entry(iteration: usize, parents: Vec<usize>) -> TraceEntry {
    TraceEntry {
        iteration,
        tag: ProposalTag::Reflective,
        parents,
        accepted: false,
        new_idx: None,
        subsample_indices: vec![0],
        subsample_scores_before: vec![0.0],
        subsample_scores_after: vec![1.0],
    }
}

/// Archive with seed `p` and two children that each improved a different
/// component: `a` rewrote `planner`, `b` rewrote `thought`.
fn sibling_state() -> GepaState<String> {
    let mut state = GepaState::initialize(
        Candidate::from([("thought", "base"), ("planner", "base")]),
        vec!["p0".to_string(), "p1".to_string()],
        vec![0.5, 0.5],
        false,
    );
    state.update_state_with_new_program(
        vec![0],
        Candidate::from([("thought", "base"), ("planner", "better")]),
        vec!["a0".to_string(), "a1".to_string()],
        vec![0.6, 0.4],
        entry(1, vec![0]),
        None,
    );
    state.update_state_with_new_program(
        vec![0],
        Candidate::from([("thought", "better"), ("planner", "base")]),
        vec!["b0".to_string(), "b1".to_string()],
        vec![0.4, 0.6],
        entry(2, vec![0]),
        None,
    );
    state
}

fn sampler() -> EpochShuffledBatchSampler {
    EpochShuffledBatchSampler::new(1, StdRng::seed_from_u64(3))
}

fn merge_adapter() -> ScriptedAdapter {
    // Keys are sorted-component joins: planner|thought.
    ScriptedAdapter::new(&[
        ("base|base", &[0.3]),
        ("better|base", &[0.4]),
        ("base|better", &[0.5]),
        ("better|better", &[0.9]),
    ])
}

#[tokio::test]
async fn siblings_with_disjoint_changes_are_merged() {
    let adapter = merge_adapter();
    let mut state = sibling_state();
    state.next_iteration();
    let mut proposer = MergeProposer::new(5);
    proposer.schedule_if_needed();

    let proposal = proposer
        .propose(&adapter, &[0], &mut state, &mut sampler())
        .await
        .unwrap()
        .expect("merge should find the sibling pair");

    assert_eq!(proposal.tag, ProposalTag::Merge);
    assert_eq!(proposal.parent_ids, vec![1, 2]);
    assert_eq!(proposal.candidate.get("thought"), Some("better"));
    assert_eq!(proposal.candidate.get("planner"), Some("better"));
    // Baseline is the element-wise best of both parents on the minibatch.
    assert_eq!(proposal.subsample_scores_before, vec![0.5]);
    assert_eq!(proposal.subsample_scores_after, vec![0.9]);
    assert!(proposal.improved());
    // Two parent evaluations plus the merged child.
    assert_eq!(adapter.evaluations(), vec![1, 1, 1]);
    assert_eq!(state.total_num_evals(), 3);
    assert_eq!(proposer.merges_performed(), 1);
}

#[tokio::test]
async fn merged_duplicates_are_suppressed() {
    let adapter = merge_adapter();
    let mut state = sibling_state();
    state.next_iteration();
    let mut proposer = MergeProposer::new(5);
    proposer.schedule_if_needed();
    proposer.schedule_if_needed();

    let first = proposer
        .propose(&adapter, &[0], &mut state, &mut sampler())
        .await
        .unwrap();
    assert!(first.is_some());

    state.next_iteration();
    let second = proposer
        .propose(&adapter, &[0], &mut state, &mut sampler())
        .await
        .unwrap();
    assert!(second.is_none());
    // The fruitless attempt keeps its credit.
    assert!(proposer.pending());
}

#[tokio::test]
async fn seed_only_archives_have_no_eligible_pair() {
    let adapter = merge_adapter();
    let mut state = GepaState::initialize(
        Candidate::from([("thought", "base"), ("planner", "base")]),
        vec!["p0".to_string()],
        vec![0.5],
        false,
    );
    state.next_iteration();
    let mut proposer = MergeProposer::new(5);
    proposer.schedule_if_needed();

    let proposal = proposer
        .propose(&adapter, &[0], &mut state, &mut sampler())
        .await
        .unwrap();

    assert!(proposal.is_none());
    assert!(proposer.pending());
    assert!(adapter.evaluations().is_empty());
}

#[tokio::test]
async fn overlapping_changes_disqualify_a_pair() {
    let adapter = ScriptedAdapter::new(&[("base|base", &[0.3])]);
    let mut state = GepaState::initialize(
        Candidate::from([("thought", "base"), ("planner", "base")]),
        vec!["p0".to_string()],
        vec![0.5],
        false,
    );
    // Both children rewrote `thought`.
    for (iteration, text) in [(1, "red"), (2, "blue")] {
        state.update_state_with_new_program(
            vec![0],
            Candidate::from([("thought", text), ("planner", "base")]),
            vec![format!("{text}-out")],
            vec![0.4],
            entry(iteration, vec![0]),
            None,
        );
    }
    state.next_iteration();
    let mut proposer = MergeProposer::new(5);
    proposer.schedule_if_needed();

    let proposal = proposer
        .propose(&adapter, &[0], &mut state, &mut sampler())
        .await
        .unwrap();

    assert!(proposal.is_none());
}

#[test]
fn scheduling_is_capped_by_max_invocations() {
    let mut proposer = MergeProposer::new(1);
    assert!(!proposer.pending());
    proposer.schedule_if_needed();
    assert!(proposer.pending());
    // Lifetime cap reached: further schedules are no-ops.
    proposer.schedule_if_needed();
    proposer.schedule_if_needed();
    assert!(proposer.pending());
}
