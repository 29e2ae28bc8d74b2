//! Check processors.
//!
//! A calculator asks each processor in turn and keeps the first definite
//! answer. Processors that answer from wildcards may afterwards be
//! overridden by a later processor that declares
//! [`PermissionProcessor::overrides_wildcards`].

pub mod direct;
pub mod implicit;
pub mod regex;
pub mod wildcard;

pub use direct::DirectProcessor;
pub use implicit::ImplicitWildcardProcessor;
pub use self::regex::RegexProcessor;
pub use wildcard::WildcardProcessor;

use super::result::{Tristate, TristateResult};
use crate::context::QueryOptions;
use crate::inheritance::ResolvedNode;
use crate::node::{Node, NodeType};
use crate::types::HolderId;

use std::collections::HashMap;
use std::sync::Arc;

pub trait PermissionProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Answers for a lower-cased permission.
    fn has_permission(&self, permission: &str) -> TristateResult;

    /// Whether answers come from wildcard-style matching.
    fn is_wildcard(&self) -> bool {
        false
    }

    /// Whether a definite answer from this processor replaces an earlier
    /// wildcard answer.
    fn overrides_wildcards(&self) -> bool {
        false
    }
}

/// Creates platform processors for a calculator. Suppliers are consulted
/// in registration order and their processors run after the built-in ones.
pub trait ProcessorSupplier: Send + Sync {
    fn create(
        &self,
        holder: &HolderId,
        query: &QueryOptions,
        source: &Arc<SourceMap>,
    ) -> Option<Box<dyn PermissionProcessor>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub node: Node,
    pub origin: HolderId,
}

impl SourceEntry {
    pub fn to_result(&self, processor: &'static str) -> TristateResult {
        TristateResult::of(
            Tristate::from_bool(self.node.value()),
            Some(self.node.clone()),
            Some(self.origin.clone()),
            processor,
        )
    }
}

/// Winning node per lower-cased key, built from a precedence-ordered
/// resolution.
#[derive(Debug, Default)]
pub struct SourceMap {
    entries: HashMap<String, SourceEntry>,
    regexes: Vec<SourceEntry>,
}

impl SourceMap {
    pub fn from_resolution(nodes: &[ResolvedNode]) -> Self {
        let mut entries: HashMap<String, SourceEntry> = HashMap::with_capacity(nodes.len());
        let mut regexes: Vec<SourceEntry> = Vec::new();

        for resolved in nodes {
            let entry = SourceEntry {
                node: resolved.node.clone(),
                origin: resolved.origin.clone(),
            };
            if matches!(resolved.node.node_type(), NodeType::Regex { .. })
                && !regexes.iter().any(|r| r.node.key() == resolved.node.key())
            {
                regexes.push(entry.clone());
            }
            entries
                .entry(resolved.node.key().to_lowercase())
                .or_insert(entry);
        }

        Self { entries, regexes }
    }

    pub fn get(&self, key: &str) -> Option<&SourceEntry> {
        self.entries.get(key)
    }

    /// Regex nodes, highest precedence first, one per pattern.
    pub fn regex_entries(&self) -> &[SourceEntry] {
        &self.regexes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Key/value view, mostly for diagnostics.
    pub fn as_map(&self) -> HashMap<String, bool> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.node.value()))
            .collect()
    }
}
