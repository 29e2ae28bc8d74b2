use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

/// Order in which the inheritance graph is walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraversalAlgorithm {
    BreadthFirst,
    #[default]
    DepthFirstPreOrder,
    DepthFirstPostOrder,
}

enum Frame<N> {
    Enter(N),
    Exit(N),
}

/// Walks the graph reachable from `root` and returns each vertex exactly
/// once, in the order given by `algorithm`.
///
/// `expand` is called once per visited vertex, before that vertex's
/// successors are visited. Vertices are identified by `key`, which makes
/// cycles harmless.
pub fn traverse<N, K, KeyFn, ExpandFn>(
    algorithm: TraversalAlgorithm,
    root: N,
    key: KeyFn,
    mut expand: ExpandFn,
) -> Vec<N>
where
    K: Eq + Hash,
    KeyFn: Fn(&N) -> K,
    ExpandFn: FnMut(&N) -> Vec<N>,
{
    let mut visited: HashSet<K> = HashSet::new();
    let mut order = Vec::new();

    match algorithm {
        TraversalAlgorithm::BreadthFirst => {
            visited.insert(key(&root));
            let mut queue = VecDeque::from([root]);
            while let Some(vertex) = queue.pop_front() {
                for child in expand(&vertex) {
                    if visited.insert(key(&child)) {
                        queue.push_back(child);
                    }
                }
                order.push(vertex);
            }
        }
        TraversalAlgorithm::DepthFirstPreOrder => {
            let mut stack = vec![root];
            while let Some(vertex) = stack.pop() {
                if !visited.insert(key(&vertex)) {
                    continue;
                }
                let children = expand(&vertex);
                order.push(vertex);
                for child in children.into_iter().rev() {
                    if !visited.contains(&key(&child)) {
                        stack.push(child);
                    }
                }
            }
        }
        TraversalAlgorithm::DepthFirstPostOrder => {
            let mut stack = vec![Frame::Enter(root)];
            while let Some(frame) = stack.pop() {
                match frame {
                    Frame::Enter(vertex) => {
                        if !visited.insert(key(&vertex)) {
                            continue;
                        }
                        let children = expand(&vertex);
                        stack.push(Frame::Exit(vertex));
                        for child in children.into_iter().rev() {
                            if !visited.contains(&key(&child)) {
                                stack.push(Frame::Enter(child));
                            }
                        }
                    }
                    Frame::Exit(vertex) => order.push(vertex),
                }
            }
        }
    }

    order
}
