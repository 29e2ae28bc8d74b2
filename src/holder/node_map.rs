use crate::node::Node;

use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

/// Copy-on-write node collection.
///
/// Readers take an `Arc` to the current snapshot and keep it for as long as
/// they need; writers build a new vector and swap it in under the write
/// lock. A reader therefore sees either the old or the new set, never a
/// partially updated one.
#[derive(Debug, Default)]
pub struct NodeMap {
    snapshot: RwLock<Arc<Vec<Node>>>,
}

impl NodeMap {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(dedup(nodes))),
        }
    }

    pub fn snapshot(&self) -> Arc<Vec<Node>> {
        self.snapshot.read().clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.read().is_empty()
    }

    pub fn contains(&self, node: &Node) -> bool {
        self.snapshot.read().contains(node)
    }

    /// Adds `node` unless an identical node is already present.
    pub fn add(&self, node: Node) -> bool {
        let mut guard = self.snapshot.write();
        if guard.contains(&node) {
            return false;
        }
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(node);
        *guard = Arc::new(next);
        true
    }

    pub fn remove(&self, node: &Node) -> bool {
        !self.remove_matching(|n| n == node).is_empty()
    }

    /// Removes every node matching `predicate` and returns them.
    pub fn remove_matching<F>(&self, predicate: F) -> Vec<Node>
    where
        F: Fn(&Node) -> bool,
    {
        let mut guard = self.snapshot.write();
        if !guard.iter().any(&predicate) {
            return Vec::new();
        }
        let (removed, kept): (Vec<Node>, Vec<Node>) =
            guard.iter().cloned().partition(|n| predicate(n));
        *guard = Arc::new(kept);
        removed
    }

    /// Replaces the whole set. Returns whether anything changed.
    pub fn replace(&self, nodes: Vec<Node>) -> bool {
        let nodes = dedup(nodes);
        let mut guard = self.snapshot.write();
        let current: HashSet<&Node> = guard.iter().collect();
        let changed = current.len() != nodes.len() || nodes.iter().any(|n| !current.contains(n));
        drop(current);
        if changed {
            *guard = Arc::new(nodes);
        }
        changed
    }
}

fn dedup(nodes: Vec<Node>) -> Vec<Node> {
    let mut seen = HashSet::with_capacity(nodes.len());
    nodes
        .into_iter()
        .filter(|n| seen.insert(n.clone()))
        .collect()
}
