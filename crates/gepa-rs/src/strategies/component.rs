use std::collections::HashMap;

use crate::candidate::Candidate;

/// Round-robin choice of which component to rewrite next.
///
/// Keeps one cursor per parent index over that parent's sorted component
/// names, so repeated proposals from the same parent cycle through its
/// components instead of hammering the first one. Deterministic given the
/// parent index and its selection history.
#[derive(Debug, Default)]
pub struct RoundRobinComponentSelector {
    cursors: HashMap<usize, usize>,
}

impl RoundRobinComponentSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next component for `parent_idx` and advances its cursor.
    ///
    /// The single-element `Vec` is the shape the adapter contract expects;
    /// richer selectors may return several components at once.
    #[tracing::instrument(
        name = "gepa.strategies.component_selector",
        level = "debug",
        skip(self, parent),
        fields(strategy = "round_robin", iteration, candidate_idx = parent_idx)
    )]
    pub fn select(
        &mut self,
        parent: &Candidate,
        parent_idx: usize,
        iteration: usize,
    ) -> Vec<String> {
        let names = parent.sorted_component_names();
        if names.is_empty() {
            return Vec::new();
        }
        let cursor = self.cursors.entry(parent_idx).or_insert(0);
        let component = names[*cursor % names.len()].clone();
        *cursor += 1;
        tracing::debug!(component = %component, "component selected");
        vec![component]
    }
}
