use super::set::{ContextSatisfyMode, ContextSet};

use serde::{Deserialize, Serialize};

/// Whether a query takes contexts into account at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    Contextual,
    /// Every node applies regardless of its context set.
    NonContextual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryFlags {
    /// Walk the inheritance graph. When false only the holder's own nodes apply.
    pub resolve_inheritance: bool,
    /// Include nodes whose context set is empty.
    pub include_global: bool,
}

impl Default for QueryFlags {
    fn default() -> Self {
        Self {
            resolve_inheritance: true,
            include_global: true,
        }
    }
}

/// The immutable bundle a resolution runs under. Used as the key of the
/// per-holder calculator and meta caches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryOptions {
    mode: QueryMode,
    contexts: ContextSet,
    flags: QueryFlags,
    satisfy_mode: ContextSatisfyMode,
}

impl QueryOptions {
    pub fn contextual(contexts: ContextSet) -> Self {
        Self {
            mode: QueryMode::Contextual,
            contexts,
            flags: QueryFlags::default(),
            satisfy_mode: ContextSatisfyMode::default(),
        }
    }

    pub fn non_contextual() -> Self {
        Self {
            mode: QueryMode::NonContextual,
            contexts: ContextSet::empty(),
            flags: QueryFlags::default(),
            satisfy_mode: ContextSatisfyMode::default(),
        }
    }

    pub fn with_flags(mut self, flags: QueryFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_satisfy_mode(mut self, satisfy_mode: ContextSatisfyMode) -> Self {
        self.satisfy_mode = satisfy_mode;
        self
    }

    pub fn mode(&self) -> QueryMode {
        self.mode
    }

    pub fn contexts(&self) -> &ContextSet {
        &self.contexts
    }

    pub fn flags(&self) -> QueryFlags {
        self.flags
    }

    pub fn satisfy_mode(&self) -> ContextSatisfyMode {
        self.satisfy_mode
    }

    /// Whether a node scoped to `node_contexts` applies under these options.
    pub fn satisfies(&self, node_contexts: &ContextSet) -> bool {
        match self.mode {
            QueryMode::NonContextual => true,
            QueryMode::Contextual => {
                if node_contexts.is_empty() {
                    self.flags.include_global
                } else {
                    node_contexts.is_satisfied_by(&self.contexts, self.satisfy_mode)
                }
            }
        }
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::contextual(ContextSet::empty())
    }
}
