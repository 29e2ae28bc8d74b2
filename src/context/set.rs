//! Immutable context sets and their specificity ordering.

use crate::error::{PermweaveError, Result};

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

/// Context key identifying the server a subject is on.
pub const SERVER_KEY: &str = "server";

/// Context key identifying the world a subject is in.
pub const WORLD_KEY: &str = "world";

/// How a node's context set is matched against the contexts of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSatisfyMode {
    /// Every pair of the node's set must be present in the query.
    #[default]
    AllValuesPerKey,
    /// For every key of the node's set, at least one of its values must be
    /// present in the query.
    AtLeastOneValuePerKey,
}

/// A single normalized `(key, value)` context pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Context {
    pub key: String,
    pub value: String,
}

impl Context {
    pub fn new(key: &str, value: &str) -> Result<Self> {
        let key = key.trim().to_lowercase();
        let value = value.trim().to_lowercase();
        if key.is_empty() {
            return Err(PermweaveError::InvalidContext(
                "context key cannot be empty".to_string(),
            ));
        }
        if value.is_empty() {
            return Err(PermweaveError::InvalidContext(format!(
                "value for context key '{}' cannot be empty",
                key
            )));
        }
        Ok(Self { key, value })
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// An immutable multimap of context pairs. A key may carry several values.
///
/// Pairs are kept sorted by key then value, which is also the order used by
/// the final lexicographic rule of [`ContextSet::compare_specificity`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextSet {
    pairs: BTreeSet<Context>,
}

impl ContextSet {
    /// The empty set. Nodes carrying it apply everywhere.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn of(key: &str, value: &str) -> Result<Self> {
        Self::empty().with(key, value)
    }

    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut set = BTreeSet::new();
        for (key, value) in pairs {
            set.insert(Context::new(key, value)?);
        }
        Ok(Self { pairs: set })
    }

    /// Returns a copy of this set with one more pair.
    pub fn with(mut self, key: &str, value: &str) -> Result<Self> {
        self.pairs.insert(Context::new(key, value)?);
        Ok(self)
    }

    /// Union of two sets.
    pub fn merge(&self, other: &ContextSet) -> ContextSet {
        let mut pairs = self.pairs.clone();
        pairs.extend(other.pairs.iter().cloned());
        ContextSet { pairs }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Context> {
        self.pairs.iter()
    }

    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.pairs.iter().any(|c| c.key == key && c.value == value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.pairs.iter().any(|c| c.key == key)
    }

    /// All values recorded for `key`, in sorted order.
    pub fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |c| c.key == key)
            .map(|c| c.value.as_str())
    }

    /// Whether a node carrying this set applies to a query with `query`.
    pub fn is_satisfied_by(&self, query: &ContextSet, mode: ContextSatisfyMode) -> bool {
        if self.is_empty() {
            return true;
        }
        match mode {
            ContextSatisfyMode::AllValuesPerKey => self.pairs.is_subset(&query.pairs),
            ContextSatisfyMode::AtLeastOneValuePerKey => {
                let mut keys: Vec<&str> = self.pairs.iter().map(|c| c.key.as_str()).collect();
                keys.dedup();
                keys.into_iter().all(|key| {
                    self.values(key).any(|value| query.contains(key, value))
                })
            }
        }
    }

    /// Total order from "most global" (least) to "most specific" (greatest).
    ///
    /// # Panics
    ///
    /// Panics if two different sets tie on every rule. Sets are kept sorted,
    /// so a tie after the lexicographic rule means the ordering itself is
    /// broken and anything sorted by it would be corrupt.
    pub fn compare_specificity(&self, other: &ContextSet) -> Ordering {
        if self == other {
            return Ordering::Equal;
        }

        let ordering = (!self.is_empty())
            .cmp(&!other.is_empty())
            .then_with(|| self.contains_key(SERVER_KEY).cmp(&other.contains_key(SERVER_KEY)))
            .then_with(|| self.contains_key(WORLD_KEY).cmp(&other.contains_key(WORLD_KEY)))
            .then_with(|| self.len().cmp(&other.len()))
            .then_with(|| self.pairs.iter().cmp(other.pairs.iter()));

        if ordering == Ordering::Equal {
            panic!(
                "distinct context sets {} and {} compare as equal",
                self, other
            );
        }
        ordering
    }
}

impl fmt::Display for ContextSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, c) in self.pairs.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", c)?;
        }
        f.write_str("}")
    }
}

impl<'a> IntoIterator for &'a ContextSet {
    type Item = &'a Context;
    type IntoIter = std::collections::btree_set::Iter<'a, Context>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.iter()
    }
}
