use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::candidate::Candidate;
use crate::error::GepaError;

/// Result of running a candidate over a dataset slice.
///
/// `outputs` and `scores` are index-aligned with the evaluated dataset;
/// `trajectories`, when captured, holds one opaque execution trace per
/// example. The engine treats higher scores as better and never inspects
/// outputs or trajectories beyond moving them around.
#[derive(Debug, Clone)]
pub struct EvaluationBatch<T, O> {
    pub outputs: Vec<O>,
    pub scores: Vec<f64>,
    pub trajectories: Option<Vec<T>>,
}

impl<T, O> EvaluationBatch<T, O> {
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Arithmetic mean of the batch's scores. `0.0` for an empty batch.
    pub fn mean_score(&self) -> f64 {
        crate::pareto::mean(&self.scores)
    }

    /// Checks the `|outputs| == |scores| == |dataset|` contract.
    pub fn check_shape(&self, expected: usize) -> Result<(), GepaError> {
        if self.scores.len() != expected {
            return Err(GepaError::BatchShape {
                expected,
                got: self.scores.len(),
                what: "scores",
            });
        }
        if self.outputs.len() != expected {
            return Err(GepaError::BatchShape {
                expected,
                got: self.outputs.len(),
                what: "outputs",
            });
        }
        if let Some(trajectories) = &self.trajectories
            && trajectories.len() != expected
        {
            return Err(GepaError::BatchShape {
                expected,
                got: trajectories.len(),
                what: "trajectories",
            });
        }
        Ok(())
    }
}

/// One record of the reflection corpus: what went in, what came out, and the
/// evaluator's verdict on it. Serialized field names are part of the adapter
/// contract — reflection prompts embed these records verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReflectiveExample {
    #[serde(rename = "Inputs")]
    pub inputs: serde_json::Value,

    #[serde(rename = "Generated Outputs")]
    pub generated_outputs: serde_json::Value,

    #[serde(rename = "Feedback")]
    pub feedback: String,
}

/// Per-component reflection corpus, keyed by component name.
pub type ReflectiveDataset = IndexMap<String, Vec<ReflectiveExample>>;

/// How the engine runs candidates without knowing what they do.
///
/// This is the only contract a task must satisfy to be optimizable. The three
/// methods mirror the three places the engine touches task semantics:
/// scoring a candidate, distilling an evaluation into reflection material,
/// and asking a reflection LM for replacement instruction texts.
///
/// `evaluate` may parallelize internally, but must return a complete batch
/// before the engine proceeds — the engine itself is single-threaded and
/// issues these calls one at a time. Timeouts and retries are the adapter's
/// responsibility; an error from any method is contained to the current
/// proposal, not the run.
#[allow(async_fn_in_trait)]
pub trait GepaAdapter {
    /// Dataset element. Opaque to the engine.
    type Example: Clone;
    /// Program output for one example. Serialized into best-output artifacts.
    type Output: Clone + Serialize;
    /// Structured execution trace for one example. Opaque to the engine.
    type Trajectory;

    /// Runs `candidate` on `batch` and scores every example (higher is
    /// better). When `capture_traces` is set, the returned batch carries one
    /// trajectory per example for reflective-dataset construction.
    async fn evaluate(
        &self,
        batch: &[Self::Example],
        candidate: &Candidate,
        capture_traces: bool,
    ) -> anyhow::Result<EvaluationBatch<Self::Trajectory, Self::Output>>;

    /// Distills an evaluation batch (including trajectories) into per-component
    /// `(inputs, generated outputs, feedback)` records for the reflection LM.
    fn make_reflective_dataset(
        &self,
        candidate: &Candidate,
        eval_batch: &EvaluationBatch<Self::Trajectory, Self::Output>,
        components: &[String],
    ) -> anyhow::Result<ReflectiveDataset>;

    /// Invokes the reflection LM and returns replacement instruction text for
    /// each requested component. See [`crate::propose::instruction`] for the
    /// prompt/parsing helpers most implementations will want.
    async fn propose_new_texts(
        &self,
        candidate: &Candidate,
        reflective_dataset: &ReflectiveDataset,
        components: &[String],
    ) -> anyhow::Result<IndexMap<String, String>>;
}
