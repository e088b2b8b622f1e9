//! Shared scripted adapter for the integration tests.
//!
//! Examples are indices into a score table keyed by the candidate's joined
//! component texts, so every evaluation is a lookup and every run is fully
//! deterministic. Reflection proposals come from a scripted queue instead of
//! an LLM.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, bail};
use indexmap::IndexMap;

use gepa_rs::{Candidate, EvaluationBatch, GepaAdapter, ReflectiveDataset, ReflectiveExample};

/// Joins the candidate's texts in sorted-component order: the score-table key.
pub fn table_key(candidate: &Candidate) -> String {
    candidate
        .sorted_component_names()
        .iter()
        .map(|name| candidate.get(name).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("|")
}

#[derive(Default)]
pub struct ScriptedAdapter {
    /// Candidate key -> per-example scores, indexed by example id.
    pub score_table: HashMap<String, Vec<f64>>,
    /// Queue of `propose_new_texts` results, popped front-first.
    pub proposals: Mutex<VecDeque<IndexMap<String, String>>>,
    /// Batch sizes of every `evaluate` call, for budget assertions.
    pub eval_sizes: Mutex<Vec<usize>>,
    /// Running count of `evaluate` calls.
    calls: AtomicUsize,
    /// When set, the `evaluate` call with this 0-based index fails.
    fail_on_call: Mutex<Option<usize>>,
    /// When set, the `evaluate` call with this index returns one score short.
    truncate_on_call: Mutex<Option<usize>>,
    /// When set, `make_reflective_dataset` returns empty record lists.
    pub empty_reflective: bool,
}

impl ScriptedAdapter {
    pub fn new(table: &[(&str, &[f64])]) -> Self {
        Self {
            score_table: table
                .iter()
                .map(|(key, scores)| (key.to_string(), scores.to_vec()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn with_proposals(self, proposals: &[&[(&str, &str)]]) -> Self {
        {
            let mut queue = self.proposals.lock().unwrap();
            for proposal in proposals {
                queue.push_back(
                    proposal
                        .iter()
                        .map(|(name, text)| (name.to_string(), text.to_string()))
                        .collect(),
                );
            }
        }
        self
    }

    pub fn evaluations(&self) -> Vec<usize> {
        self.eval_sizes.lock().unwrap().clone()
    }

    pub fn fail_evaluate_call(&self, call: usize) {
        *self.fail_on_call.lock().unwrap() = Some(call);
    }

    pub fn truncate_evaluate_call(&self, call: usize) {
        *self.truncate_on_call.lock().unwrap() = Some(call);
    }
}

impl GepaAdapter for ScriptedAdapter {
    type Example = usize;
    type Output = String;
    type Trajectory = String;

    async fn evaluate(
        &self,
        batch: &[usize],
        candidate: &Candidate,
        capture_traces: bool,
    ) -> anyhow::Result<EvaluationBatch<String, String>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_on_call.lock().unwrap() == Some(call) {
            bail!("scripted evaluation failure");
        }

        let key = table_key(candidate);
        let row = self
            .score_table
            .get(&key)
            .with_context(|| format!("no scripted scores for candidate `{key}`"))?;

        let mut scores: Vec<f64> = batch.iter().map(|&example| row[example]).collect();
        if *self.truncate_on_call.lock().unwrap() == Some(call) {
            scores.pop();
        }
        let outputs: Vec<String> = batch
            .iter()
            .map(|&example| format!("out-{key}-{example}"))
            .collect();
        let trajectories = capture_traces
            .then(|| batch.iter().map(|&example| format!("traj-{example}")).collect());

        self.eval_sizes.lock().unwrap().push(batch.len());
        Ok(EvaluationBatch {
            outputs,
            scores,
            trajectories,
        })
    }

    fn make_reflective_dataset(
        &self,
        candidate: &Candidate,
        eval_batch: &EvaluationBatch<String, String>,
        components: &[String],
    ) -> anyhow::Result<ReflectiveDataset> {
        let _ = candidate;
        let mut dataset = ReflectiveDataset::new();
        for component in components {
            let records = if self.empty_reflective {
                Vec::new()
            } else {
                eval_batch
                    .outputs
                    .iter()
                    .zip(&eval_batch.scores)
                    .map(|(output, score)| ReflectiveExample {
                        inputs: serde_json::json!({ "example": output }),
                        generated_outputs: serde_json::json!(output),
                        feedback: format!("score={score}"),
                    })
                    .collect()
            };
            dataset.insert(component.clone(), records);
        }
        Ok(dataset)
    }

    async fn propose_new_texts(
        &self,
        _candidate: &Candidate,
        _reflective_dataset: &ReflectiveDataset,
        _components: &[String],
    ) -> anyhow::Result<IndexMap<String, String>> {
        self.proposals
            .lock()
            .unwrap()
            .pop_front()
            .context("no scripted proposal left")
    }
}
