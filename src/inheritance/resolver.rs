use super::traversal::{traverse, TraversalAlgorithm};
use crate::context::QueryOptions;
use crate::holder::{DependencyStamp, GroupLookup, PermissionHolder, Validity};
use crate::node::{compare_with_contexts, Node};
use crate::types::HolderId;

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverSettings {
    pub traversal: TraversalAlgorithm,
    /// Inherit the user's primary group when no inheritance node applies.
    pub primary_group_fallback: bool,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            traversal: TraversalAlgorithm::default(),
            primary_group_fallback: true,
        }
    }
}

/// A node that applies to the resolved holder, tagged with where it came
/// from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNode {
    pub node: Node,
    pub origin: HolderId,
    /// Position of the origin in traversal order.
    pub origin_index: usize,
}

impl ResolvedNode {
    /// `Greater` when `self` takes precedence. Identical nodes inherited
    /// through different holders are ranked by traversal position.
    pub fn compare_precedence(&self, other: &ResolvedNode) -> Ordering {
        if self.node == other.node {
            return other.origin_index.cmp(&self.origin_index);
        }
        compare_with_contexts(&self.node, &other.node)
    }
}

/// The flattened result of one resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    nodes: Vec<ResolvedNode>,
    holders: Vec<HolderId>,
    dependencies: Vec<DependencyStamp>,
    valid_until: Option<DateTime<Utc>>,
}

impl Resolution {
    /// Applicable nodes, highest precedence first.
    pub fn nodes(&self) -> &[ResolvedNode] {
        &self.nodes
    }

    /// Every holder visited, in traversal order.
    pub fn holders(&self) -> &[HolderId] {
        &self.holders
    }

    pub fn dependencies(&self) -> &[DependencyStamp] {
        &self.dependencies
    }

    /// Earliest expiry among the applied nodes. The resolution is stale
    /// from that instant on.
    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.valid_until
    }

    pub fn into_validity(self) -> Validity {
        Validity::new(self.dependencies, self.valid_until)
    }
}

struct Visit {
    stamp: DependencyStamp,
    nodes: Arc<Vec<Node>>,
}

/// Collects the nodes visible to a holder under some query options.
///
/// The resolver only gathers; precedence is decided by the node ordering
/// applied to its output. Missing groups are skipped silently so that a
/// check always gets an answer.
pub struct InheritanceResolver<'a> {
    groups: &'a dyn GroupLookup,
    settings: ResolverSettings,
}

impl<'a> InheritanceResolver<'a> {
    pub fn new(groups: &'a dyn GroupLookup, settings: ResolverSettings) -> Self {
        Self { groups, settings }
    }

    /// Resolves `root` under `query`. `now` is used for every expiry check
    /// in this pass.
    pub fn resolve(
        &self,
        root: &Arc<PermissionHolder>,
        query: &QueryOptions,
        now: DateTime<Utc>,
    ) -> Resolution {
        let applies = |node: &Node| !node.has_expired(now) && query.satisfies(node.contexts());
        let mut visits: HashMap<HolderId, Visit> = HashMap::new();

        let order = traverse(
            self.settings.traversal,
            root.clone(),
            |holder: &Arc<PermissionHolder>| holder.id().clone(),
            |holder: &Arc<PermissionHolder>| {
                // stamp before reading the snapshot
                let stamp = DependencyStamp::capture(holder);
                let nodes = holder.nodes();
                let children = if query.flags().resolve_inheritance {
                    self.parents(holder, &nodes, &applies)
                } else {
                    Vec::new()
                };
                visits.insert(holder.id().clone(), Visit { stamp, nodes });
                children
            },
        );

        let mut resolved = Vec::new();
        let mut holders = Vec::with_capacity(order.len());
        let mut dependencies = Vec::with_capacity(order.len());
        for (index, holder) in order.iter().enumerate() {
            let Some(visit) = visits.remove(holder.id()) else {
                continue;
            };
            resolved.extend(visit.nodes.iter().filter(|n| applies(n)).map(|n| ResolvedNode {
                node: n.clone(),
                origin: holder.id().clone(),
                origin_index: index,
            }));
            holders.push(holder.id().clone());
            dependencies.push(visit.stamp);
        }

        resolved.sort_by(|a, b| b.compare_precedence(a));
        let valid_until = resolved.iter().filter_map(|n| n.node.expiry()).min();

        Resolution {
            nodes: resolved,
            holders,
            dependencies,
            valid_until,
        }
    }

    /// Loaded groups `holder` inherits, heaviest first.
    fn parents<F>(
        &self,
        holder: &Arc<PermissionHolder>,
        nodes: &[Node],
        applies: &F,
    ) -> Vec<Arc<PermissionHolder>>
    where
        F: Fn(&Node) -> bool,
    {
        let mut names: Vec<String> = Vec::new();
        for node in nodes.iter().filter(|n| applies(n)) {
            if let Some(group) = node.inherited_group() {
                if !names.contains(&group) {
                    names.push(group);
                }
            }
        }

        if names.is_empty() && self.settings.primary_group_fallback {
            if let Some(primary) = holder.primary_group() {
                names.push(primary);
            }
        }

        let mut parents: Vec<(i32, Arc<PermissionHolder>)> = names
            .into_iter()
            .filter_map(|name| match self.groups.group(&name) {
                Some(group) => Some((group.weight(), group)),
                None => {
                    debug!(holder = %holder.id(), group = %name, "Skipping inherited group that is not loaded");
                    None
                }
            })
            .collect();

        parents.sort_by(|(wa, a), (wb, b)| wb.cmp(wa).then_with(|| a.id().name.cmp(&b.id().name)));
        parents.into_iter().map(|(_, group)| group).collect()
    }
}
