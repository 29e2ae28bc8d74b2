use crate::error::Result;

use prometheus::{IntCounter, IntGauge, Registry};
use std::sync::Arc;

pub struct Metrics {
    pub permission_checks: IntCounter,
    pub permission_cache_hits: IntCounter,
    pub meta_lookups: IntCounter,
    pub calculator_cache_hits: IntCounter,
    pub calculator_cache_misses: IntCounter,
    pub calculators_built: IntCounter,
    pub cache_invalidations: IntCounter,
    pub messages_sent: IntCounter,
    pub messages_received: IntCounter,
    pub duplicate_messages: IntCounter,
    pub transport_reconnects: IntCounter,
    pub loaded_users: IntGauge,
    pub loaded_groups: IntGauge,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>> {
        let registry = Registry::new();

        let permission_checks = IntCounter::new(
            "permission_checks_total",
            "Total number of permission checks",
        )?;
        let permission_cache_hits = IntCounter::new(
            "permission_cache_hits_total",
            "Permission checks answered from a calculator's result cache",
        )?;
        let meta_lookups = IntCounter::new("meta_lookups_total", "Total number of meta lookups")?;
        let calculator_cache_hits = IntCounter::new(
            "calculator_cache_hits_total",
            "Lookups served by an existing calculator or meta cache",
        )?;
        let calculator_cache_misses = IntCounter::new(
            "calculator_cache_misses_total",
            "Lookups that had to resolve inheritance",
        )?;
        let calculators_built = IntCounter::new(
            "calculators_built_total",
            "Permission calculators constructed",
        )?;
        let cache_invalidations = IntCounter::new(
            "cache_invalidations_total",
            "Holder cache invalidations",
        )?;
        let messages_sent = IntCounter::new(
            "messenger_messages_sent_total",
            "Messages published to the messenger",
        )?;
        let messages_received = IntCounter::new(
            "messenger_messages_received_total",
            "Messages accepted from the messenger",
        )?;
        let duplicate_messages = IntCounter::new(
            "messenger_duplicate_messages_total",
            "Incoming messages dropped as already seen",
        )?;
        let transport_reconnects = IntCounter::new(
            "messenger_reconnects_total",
            "Messenger transport reconnect attempts",
        )?;
        let loaded_users = IntGauge::new("loaded_users", "Number of loaded users")?;
        let loaded_groups = IntGauge::new("loaded_groups", "Number of loaded groups")?;

        registry.register(Box::new(permission_checks.clone()))?;
        registry.register(Box::new(permission_cache_hits.clone()))?;
        registry.register(Box::new(meta_lookups.clone()))?;
        registry.register(Box::new(calculator_cache_hits.clone()))?;
        registry.register(Box::new(calculator_cache_misses.clone()))?;
        registry.register(Box::new(calculators_built.clone()))?;
        registry.register(Box::new(cache_invalidations.clone()))?;
        registry.register(Box::new(messages_sent.clone()))?;
        registry.register(Box::new(messages_received.clone()))?;
        registry.register(Box::new(duplicate_messages.clone()))?;
        registry.register(Box::new(transport_reconnects.clone()))?;
        registry.register(Box::new(loaded_users.clone()))?;
        registry.register(Box::new(loaded_groups.clone()))?;

        Ok(Arc::new(Self {
            permission_checks,
            permission_cache_hits,
            meta_lookups,
            calculator_cache_hits,
            calculator_cache_misses,
            calculators_built,
            cache_invalidations,
            messages_sent,
            messages_received,
            duplicate_messages,
            transport_reconnects,
            loaded_users,
            loaded_groups,
            registry,
        }))
    }
}
