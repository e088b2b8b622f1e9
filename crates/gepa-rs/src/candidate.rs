use std::collections::BTreeSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A candidate program: an immutable mapping from component name to instruction text.
///
/// The optimizer never looks past this mapping — what a component *does* is the
/// adapter's business. The set of component names is fixed by the seed candidate;
/// every descendant produced by mutation or merge carries exactly the same names
/// with (some) different texts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Candidate {
    components: IndexMap<String, String>,
}

impl Candidate {
    pub fn new(components: IndexMap<String, String>) -> Self {
        Self { components }
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn get(&self, component: &str) -> Option<&str> {
        self.components.get(component).map(String::as_str)
    }

    pub fn contains(&self, component: &str) -> bool {
        self.components.contains_key(component)
    }

    /// Component names in seed insertion order.
    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.components.keys().map(String::as_str)
    }

    /// Component names sorted lexicographically. The round-robin component
    /// selector cycles over this ordering so cursor positions are stable.
    pub fn sorted_component_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.components.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.components
            .iter()
            .map(|(name, text)| (name.as_str(), text.as_str()))
    }

    /// Produces a child candidate with `updates` applied on top of this one.
    ///
    /// Only names already present are updated — the component set never grows.
    /// Unknown names in `updates` are ignored.
    pub fn merge(&self, updates: &IndexMap<String, String>) -> Self {
        let components = self
            .components
            .iter()
            .map(|(name, text)| {
                let text = updates.get(name).unwrap_or(text).clone();
                (name.clone(), text)
            })
            .collect();
        Self { components }
    }

    /// Names of components whose text differs between `self` and `other`.
    ///
    /// Both candidates are assumed to share the seed's component set; a name
    /// present on only one side counts as differing.
    pub fn diff(&self, other: &Candidate) -> BTreeSet<String> {
        let mut changed = BTreeSet::new();
        for (name, text) in &self.components {
            if other.get(name) != Some(text.as_str()) {
                changed.insert(name.clone());
            }
        }
        for name in other.components.keys() {
            if !self.contains(name) {
                changed.insert(name.clone());
            }
        }
        changed
    }

    /// Order-insensitive content fingerprint, used to suppress duplicate merges.
    pub fn fingerprint(&self) -> u64 {
        let mut pairs: Vec<(&String, &String)> = self.components.iter().collect();
        pairs.sort();
        let mut hasher = DefaultHasher::new();
        for (name, text) in pairs {
            name.hash(&mut hasher);
            text.hash(&mut hasher);
        }
        hasher.finish()
    }
}

impl FromIterator<(String, String)> for Candidate {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            components: iter.into_iter().collect(),
        }
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Candidate {
    fn from(pairs: [(&str, &str); N]) -> Self {
        pairs
            .into_iter()
            .map(|(name, text)| (name.to_string(), text.to_string()))
            .collect()
    }
}
