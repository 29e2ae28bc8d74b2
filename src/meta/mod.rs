pub mod accumulator;
pub mod element;
pub mod registry;
pub mod stack;

pub use accumulator::{AccumulatedMeta, MetaAccumulator};
pub use element::{ChatMetaEntry, ElementFilter, MetaStackElement, PriorityRule, StandardElement};
pub use registry::ElementRegistry;
pub use stack::{DuplicateRemoval, MetaStack, MetaStackDefinition};

use crate::context::QueryOptions;
use crate::inheritance::Resolution;
use crate::metrics::Metrics;
use crate::types::{CheckOrigin, HolderId};
use crate::verbose::{CheckKind, VerboseEvent, VerboseSink};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Resolved meta for one holder under one set of query options.
pub struct MetaCache {
    holder: HolderId,
    query: QueryOptions,
    meta: HashMap<String, Vec<String>>,
    prefixes: BTreeMap<i32, String>,
    suffixes: BTreeMap<i32, String>,
    prefix: String,
    suffix: String,
    weight: Option<i32>,
    primary_group: Option<String>,
    verbose: Arc<dyn VerboseSink>,
    metrics: Option<Arc<Metrics>>,
}

impl MetaCache {
    /// First value recorded for `key`.
    pub fn meta_value(&self, key: &str, origin: CheckOrigin) -> Option<&str> {
        let key = key.to_lowercase();
        let value = self
            .meta
            .get(&key)
            .and_then(|values| values.first())
            .map(String::as_str);
        self.report(key, value, origin);
        value
    }

    /// Every value recorded for `key`, highest precedence first.
    pub fn meta_values(&self, key: &str) -> &[String] {
        self.meta
            .get(&key.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn meta(&self) -> &HashMap<String, Vec<String>> {
        &self.meta
    }

    /// The stacked prefix, `None` when the stack is empty.
    pub fn prefix(&self, origin: CheckOrigin) -> Option<&str> {
        let value = Some(self.prefix.as_str()).filter(|p| !p.is_empty());
        self.report("prefix".to_string(), value, origin);
        value
    }

    pub fn suffix(&self, origin: CheckOrigin) -> Option<&str> {
        let value = Some(self.suffix.as_str()).filter(|s| !s.is_empty());
        self.report("suffix".to_string(), value, origin);
        value
    }

    /// Prefix per priority, highest priority last.
    pub fn prefixes(&self) -> &BTreeMap<i32, String> {
        &self.prefixes
    }

    pub fn suffixes(&self) -> &BTreeMap<i32, String> {
        &self.suffixes
    }

    pub fn weight(&self) -> Option<i32> {
        self.weight
    }

    pub fn primary_group(&self) -> Option<&str> {
        self.primary_group.as_deref()
    }

    pub fn holder(&self) -> &HolderId {
        &self.holder
    }

    fn report(&self, key: String, value: Option<&str>, origin: CheckOrigin) {
        if let Some(metrics) = &self.metrics {
            metrics.meta_lookups.inc();
        }
        if self.verbose.is_enabled() {
            self.verbose.record(VerboseEvent {
                kind: CheckKind::Meta,
                origin,
                holder: self.holder.clone(),
                contexts: self.query.contexts().clone(),
                key,
                result: value.unwrap_or("undefined").to_string(),
                processor: None,
            });
        }
    }
}

/// Builds meta caches from resolutions.
pub struct MetaFactory {
    prefix: Arc<MetaStackDefinition>,
    suffix: Arc<MetaStackDefinition>,
    verbose: Arc<dyn VerboseSink>,
    metrics: Option<Arc<Metrics>>,
}

impl MetaFactory {
    pub fn new(
        prefix: Arc<MetaStackDefinition>,
        suffix: Arc<MetaStackDefinition>,
        verbose: Arc<dyn VerboseSink>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            prefix,
            suffix,
            verbose,
            metrics,
        }
    }

    pub fn build(
        &self,
        holder: &HolderId,
        primary_group: Option<String>,
        query: &QueryOptions,
        resolution: &Resolution,
    ) -> MetaCache {
        let mut accumulator = MetaAccumulator::new(self.prefix.clone(), self.suffix.clone());
        accumulator.accumulate_all(resolution.nodes());
        let accumulated = accumulator.complete();

        MetaCache {
            holder: holder.clone(),
            query: query.clone(),
            meta: accumulated.meta,
            prefixes: accumulated
                .prefixes
                .into_iter()
                .map(|(p, e)| (p, e.value))
                .collect(),
            suffixes: accumulated
                .suffixes
                .into_iter()
                .map(|(p, e)| (p, e.value))
                .collect(),
            prefix: accumulated.prefix,
            suffix: accumulated.suffix,
            weight: accumulated.weight,
            primary_group,
            verbose: self.verbose.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holder::{GroupManager, PermissionHolder};
    use crate::inheritance::{InheritanceResolver, ResolverSettings};
    use crate::node::Node;
    use crate::verbose::RecordingVerboseSink;
    use chrono::Utc;

    fn definition(elements: &[&str], spacers: (&str, &str, &str)) -> Arc<MetaStackDefinition> {
        let elements = elements
            .iter()
            .map(|e| Arc::new(StandardElement::parse(e, None).unwrap()) as Arc<dyn MetaStackElement>)
            .collect();
        Arc::new(MetaStackDefinition::new(
            elements,
            DuplicateRemoval::RetainAll,
            spacers.0,
            spacers.1,
            spacers.2,
        ))
    }

    #[test]
    fn test_meta_cache_from_inheritance() {
        let groups = GroupManager::new();
        groups.insert(Arc::new(PermissionHolder::new_group(
            "staff",
            vec![Node::prefix(5, "B").unwrap(), Node::meta("colour", "red").unwrap()],
        )));
        let holder = Arc::new(PermissionHolder::new_group(
            "admin",
            vec![
                Node::prefix(10, "A").unwrap(),
                Node::inheritance("staff").unwrap(),
                Node::meta("colour", "blue").unwrap(),
            ],
        ));

        let resolver = InheritanceResolver::new(&groups, ResolverSettings::default());
        let query = QueryOptions::default();
        let resolution = resolver.resolve(&holder, &query, Utc::now());

        let sink = Arc::new(RecordingVerboseSink::new());
        let factory = MetaFactory::new(
            definition(&["highest", "lowest"], ("[", " | ", "]")),
            definition(&["highest"], ("", "", "")),
            sink.clone(),
            None,
        );
        let cache = factory.build(holder.id(), None, &query, &resolution);

        assert_eq!(cache.prefix(CheckOrigin::Internal), Some("[A | B]"));
        assert_eq!(cache.suffix(CheckOrigin::Internal), None);
        assert_eq!(cache.meta_values("colour").len(), 2);
        assert!(cache.meta_value("COLOUR", CheckOrigin::ThirdPartyApi).is_some());
        assert_eq!(cache.prefixes().len(), 2);

        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.kind == CheckKind::Meta));
        assert_eq!(events[1].result, "undefined");
    }
}
