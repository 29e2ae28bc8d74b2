pub mod processor;
pub mod result;

pub use processor::{PermissionProcessor, ProcessorSupplier, SourceEntry, SourceMap};
pub use result::{Tristate, TristateResult};

use crate::context::QueryOptions;
use crate::inheritance::Resolution;
use crate::metrics::Metrics;
use crate::types::{CheckOrigin, HolderId};
use crate::verbose::{CheckKind, VerboseEvent, VerboseSink};
use processor::{DirectProcessor, ImplicitWildcardProcessor, RegexProcessor, WildcardProcessor};

use dashmap::DashMap;
use std::sync::Arc;

/// Which built-in processors a calculator gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorSettings {
    pub apply_wildcards: bool,
    pub apply_regex: bool,
    pub apply_implicit_wildcards: bool,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            apply_wildcards: true,
            apply_regex: true,
            apply_implicit_wildcards: false,
        }
    }
}

/// Answers permission checks for one holder under one set of query
/// options. Results are memoized per lower-cased permission for the
/// lifetime of the calculator; the holder's cache discards the whole
/// calculator when anything it was built from changes.
pub struct PermissionCalculator {
    holder: HolderId,
    query: QueryOptions,
    processors: Vec<Box<dyn PermissionProcessor>>,
    cache: DashMap<String, TristateResult>,
    verbose: Arc<dyn VerboseSink>,
    metrics: Option<Arc<Metrics>>,
}

impl PermissionCalculator {
    pub fn new(
        holder: HolderId,
        query: QueryOptions,
        processors: Vec<Box<dyn PermissionProcessor>>,
        verbose: Arc<dyn VerboseSink>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            holder,
            query,
            processors,
            cache: DashMap::new(),
            verbose,
            metrics,
        }
    }

    pub fn holder(&self) -> &HolderId {
        &self.holder
    }

    pub fn query(&self) -> &QueryOptions {
        &self.query
    }

    pub fn processor_names(&self) -> Vec<&'static str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    pub fn check(&self, permission: &str, origin: CheckOrigin) -> TristateResult {
        let key = permission.to_lowercase();

        let cached = self.cache.get(&key).map(|r| r.value().clone());
        let result = match cached {
            Some(result) => {
                if let Some(metrics) = &self.metrics {
                    metrics.permission_cache_hits.inc();
                }
                result
            }
            None => {
                let result = self.compute(&key);
                self.cache.insert(key.clone(), result.clone());
                result
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.permission_checks.inc();
        }

        if self.verbose.is_enabled() {
            self.verbose.record(VerboseEvent {
                kind: CheckKind::Permission,
                origin,
                holder: self.holder.clone(),
                contexts: self.query.contexts().clone(),
                key,
                result: result.result().to_string(),
                processor: result.processor(),
            });
        }

        result
    }

    fn compute(&self, permission: &str) -> TristateResult {
        let mut result = TristateResult::undefined();
        let mut from_wildcard = false;

        for processor in &self.processors {
            if !result.result().is_defined() {
                result = processor.has_permission(permission);
                from_wildcard = processor.is_wildcard();
            } else if from_wildcard && processor.overrides_wildcards() {
                let replacement = processor.has_permission(permission);
                if replacement.result().is_defined() {
                    result = replacement.with_overridden(result);
                    from_wildcard = processor.is_wildcard();
                }
            }
        }

        result
    }

    /// Drops memoized results without discarding the calculator.
    pub fn invalidate_cache(&self) {
        self.cache.clear();
    }

    pub fn cached_results(&self) -> usize {
        self.cache.len()
    }
}

/// Builds calculators from resolutions.
pub struct CalculatorFactory {
    settings: ProcessorSettings,
    suppliers: Vec<Arc<dyn ProcessorSupplier>>,
    verbose: Arc<dyn VerboseSink>,
    metrics: Option<Arc<Metrics>>,
}

impl CalculatorFactory {
    pub fn new(
        settings: ProcessorSettings,
        suppliers: Vec<Arc<dyn ProcessorSupplier>>,
        verbose: Arc<dyn VerboseSink>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            settings,
            suppliers,
            verbose,
            metrics,
        }
    }

    pub fn build(
        &self,
        holder: &HolderId,
        query: &QueryOptions,
        resolution: &Resolution,
    ) -> PermissionCalculator {
        let source = Arc::new(SourceMap::from_resolution(resolution.nodes()));

        let mut processors: Vec<Box<dyn PermissionProcessor>> = Vec::with_capacity(4 + self.suppliers.len());
        processors.push(Box::new(DirectProcessor::new(source.clone())));
        if self.settings.apply_regex {
            let regex = RegexProcessor::new(&source);
            if !regex.is_empty() {
                processors.push(Box::new(regex));
            }
        }
        if self.settings.apply_wildcards {
            processors.push(Box::new(WildcardProcessor::new(source.clone())));
        }
        if self.settings.apply_implicit_wildcards {
            processors.push(Box::new(ImplicitWildcardProcessor::new(source.clone())));
        }
        for supplier in &self.suppliers {
            if let Some(processor) = supplier.create(holder, query, &source) {
                processors.push(processor);
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.calculators_built.inc();
        }

        PermissionCalculator::new(
            holder.clone(),
            query.clone(),
            processors,
            self.verbose.clone(),
            self.metrics.clone(),
        )
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

    fn calculator_for(
        nodes: Vec<Node>,
        settings: ProcessorSettings,
        suppliers: Vec<Arc<dyn ProcessorSupplier>>,
    ) -> (PermissionCalculator, Arc<RecordingVerboseSink>) {
        let groups = GroupManager::new();
        let holder = Arc::new(PermissionHolder::new_group("test", nodes));
        let resolver = InheritanceResolver::new(&groups, ResolverSettings::default());
        let query = QueryOptions::default();
        let resolution = resolver.resolve(&holder, &query, Utc::now());
        let sink = Arc::new(RecordingVerboseSink::new());
        let factory = CalculatorFactory::new(settings, suppliers, sink.clone(), None);
        (factory.build(holder.id(), &query, &resolution), sink)
    }

    fn perms(pairs: &[(&str, bool)]) -> Vec<Node> {
        pairs
            .iter()
            .map(|(k, v)| Node::permission(k, *v).unwrap())
            .collect()
    }

    fn check(calc: &PermissionCalculator, permission: &str) -> Tristate {
        calc.check(permission, CheckOrigin::Internal).result()
    }

    #[test]
    fn test_direct_checks() {
        let (calc, _) = calculator_for(
            perms(&[("test.node1", true), ("test.node2", false)]),
            ProcessorSettings::default(),
            vec![],
        );
        assert_eq!(check(&calc, "test.node1"), Tristate::True);
        assert_eq!(check(&calc, "TEST.NODE2"), Tristate::False);
        assert_eq!(check(&calc, "test"), Tristate::Undefined);
    }

    #[test]
    fn test_wildcard_ladder() {
        let (calc, _) = calculator_for(
            perms(&[
                ("one.two.three.four", true),
                ("one.two.three.*", false),
                ("one.two.three", true),
                ("one.two.*", false),
                ("one.two", true),
                ("one.*", false),
                ("one", true),
                ("*", false),
            ]),
            ProcessorSettings::default(),
            vec![],
        );

        assert_eq!(check(&calc, "one.two.three.four"), Tristate::True);
        assert_eq!(check(&calc, "one.two.three.test"), Tristate::False);
        assert_eq!(check(&calc, "one.two.three"), Tristate::True);
        assert_eq!(check(&calc, "one.two.test"), Tristate::False);
        assert_eq!(check(&calc, "one.two"), Tristate::True);
        assert_eq!(check(&calc, "one.test"), Tristate::False);
        assert_eq!(check(&calc, "one"), Tristate::True);
        assert_eq!(check(&calc, "test"), Tristate::False);
        // the wildcard node itself is a direct hit
        let result = calc.check("one.two.three.*", CheckOrigin::Internal);
        assert_eq!(result.result(), Tristate::False);
        assert_eq!(result.processor(), Some("direct"));
    }

    #[test]
    fn test_wildcards_can_be_disabled() {
        let (calc, _) = calculator_for(
            perms(&[("a.*", true)]),
            ProcessorSettings {
                apply_wildcards: false,
                ..ProcessorSettings::default()
            },
            vec![],
        );
        assert_eq!(check(&calc, "a.b"), Tristate::Undefined);
        assert_eq!(calc.processor_names(), vec!["direct"]);
    }

    #[test]
    fn test_regex_before_wildcard() {
        let (calc, _) = calculator_for(
            perms(&[(r"r=hello\d+", true), ("*", false)]),
            ProcessorSettings::default(),
            vec![],
        );
        assert_eq!(check(&calc, "hello42"), Tristate::True);
        assert_eq!(check(&calc, "hello"), Tristate::False);
    }

    #[test]
    fn test_implicit_wildcards() {
        let (calc, _) = calculator_for(
            perms(&[("one", true)]),
            ProcessorSettings {
                apply_implicit_wildcards: true,
                ..ProcessorSettings::default()
            },
            vec![],
        );
        assert_eq!(check(&calc, "one.test"), Tristate::True);
    }

    struct OverrideSupplier;

    struct OverrideProcessor;

    impl PermissionProcessor for OverrideProcessor {
        fn name(&self) -> &'static str {
            "override"
        }

        fn has_permission(&self, permission: &str) -> TristateResult {
            if permission == "overridetest.test" {
                TristateResult::of(Tristate::True, None, None, "override")
            } else {
                TristateResult::undefined()
            }
        }

        fn overrides_wildcards(&self) -> bool {
            true
        }
    }

    impl ProcessorSupplier for OverrideSupplier {
        fn create(
            &self,
            _holder: &HolderId,
            _query: &QueryOptions,
            _source: &Arc<SourceMap>,
        ) -> Option<Box<dyn PermissionProcessor>> {
            Some(Box::new(OverrideProcessor))
        }
    }

    #[test]
    fn test_override_processor_replaces_wildcard_result() {
        let (calc, _) = calculator_for(
            perms(&[("overridetest.*", false), ("exact", false)]),
            ProcessorSettings::default(),
            vec![Arc::new(OverrideSupplier)],
        );

        let result = calc.check("overridetest.test", CheckOrigin::Internal);
        assert_eq!(result.result(), Tristate::True);
        assert_eq!(result.processor(), Some("override"));
        let overridden = result.overridden().unwrap();
        assert_eq!(overridden.result(), Tristate::False);
        assert_eq!(overridden.processor(), Some("wildcard"));

        assert_eq!(check(&calc, "overridetest.other"), Tristate::False);
    }

    struct BypassProcessor;

    impl PermissionProcessor for BypassProcessor {
        fn name(&self) -> &'static str {
            "bypass"
        }

        fn has_permission(&self, _permission: &str) -> TristateResult {
            TristateResult::of(Tristate::True, None, None, "bypass")
        }
    }

    struct BypassSupplier;

    impl ProcessorSupplier for BypassSupplier {
        fn create(
            &self,
            _holder: &HolderId,
            _query: &QueryOptions,
            _source: &Arc<SourceMap>,
        ) -> Option<Box<dyn PermissionProcessor>> {
            Some(Box::new(BypassProcessor))
        }
    }

    #[test]
    fn test_platform_processor_only_fills_undefined() {
        let (calc, _) = calculator_for(
            perms(&[("denied", false)]),
            ProcessorSettings::default(),
            vec![Arc::new(BypassSupplier)],
        );
        assert_eq!(check(&calc, "denied"), Tristate::False);
        assert_eq!(check(&calc, "anything.else"), Tristate::True);
    }

    #[test]
    fn test_every_lookup_is_reported() {
        let (calc, sink) = calculator_for(perms(&[("a", true)]), ProcessorSettings::default(), vec![]);
        check(&calc, "a");
        check(&calc, "A");
        check(&calc, "b");
        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].key, "a");
        assert_eq!(events[1].result, "true");
        assert_eq!(events[2].result, "undefined");
        assert_eq!(calc.cached_results(), 2);
    }
}
