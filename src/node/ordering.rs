//! Precedence order over nodes.
//!
//! Both comparators return `Ordering::Greater` when `a` takes precedence
//! over `b`. Sorting a list in descending order therefore puts the winning
//! node first.

use super::Node;

use std::cmp::Ordering;

/// Node-intrinsic precedence, ignoring contexts.
///
/// 1. temporary beats permanent
/// 2. exact beats wildcard
/// 3. of two temporary nodes, the one expiring sooner wins
/// 4. of two wildcards, the higher wildcard level wins
/// 5. the lexicographically smaller key wins
/// 6. deny beats grant
pub fn compare_nodes(a: &Node, b: &Node) -> Ordering {
    a.is_temporary()
        .cmp(&b.is_temporary())
        .then_with(|| (!a.is_wildcard()).cmp(&!b.is_wildcard()))
        .then_with(|| match (a.expiry(), b.expiry()) {
            (Some(ea), Some(eb)) => eb.cmp(&ea),
            _ => Ordering::Equal,
        })
        .then_with(|| match (a.wildcard_level(), b.wildcard_level()) {
            (Some(la), Some(lb)) => la.cmp(&lb),
            _ => Ordering::Equal,
        })
        .then_with(|| b.key().cmp(a.key()))
        .then_with(|| (!a.value()).cmp(&!b.value()))
}

/// Context specificity first, then [`compare_nodes`].
///
/// # Panics
///
/// Panics when two different nodes compare as equal. Every field of a node
/// takes part in the rules, so this can only mean the rules are broken.
pub fn compare_with_contexts(a: &Node, b: &Node) -> Ordering {
    let ordering = a
        .contexts()
        .compare_specificity(b.contexts())
        .then_with(|| compare_nodes(a, b));

    if ordering == Ordering::Equal && a != b {
        panic!("distinct nodes {} and {} compare as equal", a, b);
    }
    ordering
}
