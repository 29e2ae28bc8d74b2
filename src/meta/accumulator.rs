use super::element::ChatMetaEntry;
use super::stack::{MetaStack, MetaStackDefinition};
use crate::inheritance::ResolvedNode;
use crate::node::{ChatMetaType, NodeType};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Everything meta-related gathered from one resolution.
#[derive(Debug, Clone)]
pub struct AccumulatedMeta {
    pub meta: HashMap<String, Vec<String>>,
    pub prefixes: BTreeMap<i32, ChatMetaEntry>,
    pub suffixes: BTreeMap<i32, ChatMetaEntry>,
    pub weight: Option<i32>,
    pub prefix: String,
    pub suffix: String,
}

/// Collects meta from nodes offered in precedence order.
///
/// Only granting nodes count. For each priority the first prefix or suffix
/// offered wins; meta keys keep every value in the order offered. Consuming
/// the accumulator with [`MetaAccumulator::complete`] ends accumulation.
#[derive(Debug)]
pub struct MetaAccumulator {
    meta: HashMap<String, Vec<String>>,
    prefixes: BTreeMap<i32, ChatMetaEntry>,
    suffixes: BTreeMap<i32, ChatMetaEntry>,
    weight: Option<i32>,
    prefix_stack: MetaStack,
    suffix_stack: MetaStack,
}

impl MetaAccumulator {
    pub fn new(prefix: Arc<MetaStackDefinition>, suffix: Arc<MetaStackDefinition>) -> Self {
        Self {
            meta: HashMap::new(),
            prefixes: BTreeMap::new(),
            suffixes: BTreeMap::new(),
            weight: None,
            prefix_stack: MetaStack::new(prefix, ChatMetaType::Prefix),
            suffix_stack: MetaStack::new(suffix, ChatMetaType::Suffix),
        }
    }

    pub fn accumulate(&mut self, resolved: &ResolvedNode) {
        if !resolved.node.value() {
            return;
        }

        match resolved.node.node_type() {
            NodeType::Meta { key, value } => {
                self.meta.entry(key.to_lowercase()).or_default().push(value);
            }
            NodeType::ChatMeta { .. } => {
                if let Some(entry) = ChatMetaEntry::from_resolved(resolved) {
                    let (map, stack) = match entry.meta_type {
                        ChatMetaType::Prefix => (&mut self.prefixes, &mut self.prefix_stack),
                        ChatMetaType::Suffix => (&mut self.suffixes, &mut self.suffix_stack),
                    };
                    stack.accumulate(&entry);
                    map.entry(entry.priority).or_insert(entry);
                }
            }
            NodeType::Weight { weight } => {
                self.weight = Some(self.weight.map_or(weight, |w| w.max(weight)));
            }
            _ => {}
        }
    }

    pub fn accumulate_all(&mut self, nodes: &[ResolvedNode]) {
        for node in nodes {
            self.accumulate(node);
        }
    }

    pub fn complete(self) -> AccumulatedMeta {
        AccumulatedMeta {
            prefix: self.prefix_stack.build(),
            suffix: self.suffix_stack.build(),
            meta: self.meta,
            prefixes: self.prefixes,
            suffixes: self.suffixes,
            weight: self.weight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::element::{MetaStackElement, StandardElement};
    use crate::meta::stack::DuplicateRemoval;
    use crate::node::Node;
    use crate::types::HolderId;

    fn definition(elements: &[&str]) -> Arc<MetaStackDefinition> {
        let elements = elements
            .iter()
            .map(|e| Arc::new(StandardElement::parse(e, None).unwrap()) as Arc<dyn MetaStackElement>)
            .collect();
        Arc::new(MetaStackDefinition::new(elements, DuplicateRemoval::RetainAll, "", " ", ""))
    }

    fn resolved(node: Node, origin: &str, index: usize) -> ResolvedNode {
        ResolvedNode {
            node,
            origin: HolderId::group(origin),
            origin_index: index,
        }
    }

    #[test]
    fn test_accumulates_meta_chat_and_weight() {
        let mut acc = MetaAccumulator::new(definition(&["highest"]), definition(&["highest"]));
        acc.accumulate_all(&[
            resolved(Node::meta("Rank", "gold").unwrap(), "a", 0),
            resolved(Node::meta("rank", "silver").unwrap(), "b", 1),
            resolved(Node::prefix(10, "[A]").unwrap(), "a", 0),
            resolved(Node::prefix(10, "[B]").unwrap(), "b", 1),
            resolved(Node::prefix(20, "[C]").unwrap(), "b", 1),
            resolved(Node::suffix(1, "!").unwrap(), "a", 0),
            resolved(Node::weight(5).unwrap(), "a", 0),
            resolved(Node::weight(50).unwrap(), "b", 1),
            resolved(Node::meta("hidden", "x").unwrap().with_value(false), "a", 0),
        ]);
        let meta = acc.complete();

        assert_eq!(meta.meta["rank"], vec!["gold", "silver"]);
        assert!(!meta.meta.contains_key("hidden"));
        assert_eq!(meta.prefixes[&10].value, "[A]");
        assert_eq!(meta.prefixes[&20].value, "[C]");
        assert_eq!(meta.prefix, "[C]");
        assert_eq!(meta.suffix, "!");
        assert_eq!(meta.weight, Some(50));
    }

    #[test]
    fn test_nothing_accumulated() {
        let acc = MetaAccumulator::new(definition(&["highest"]), definition(&["lowest"]));
        let meta = acc.complete();
        assert_eq!(meta.prefix, "");
        assert_eq!(meta.suffix, "");
        assert!(meta.prefixes.is_empty());
        assert_eq!(meta.weight, None);
    }
}
