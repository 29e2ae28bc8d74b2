use super::local::{LocalBus, LocalMessengerProvider};
use super::sql::SqlMessengerProvider;
use super::traits::MessengerProvider;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Named messenger providers. The engine picks one by the configured
/// `messaging.service`.
pub struct MessengerRegistry {
    providers: RwLock<HashMap<String, Arc<dyn MessengerProvider>>>,
}

impl MessengerRegistry {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
        }
    }

    /// A registry holding every transport compiled into this build. The
    /// `local` provider is attached to `bus`.
    pub fn with_defaults(bus: LocalBus) -> Self {
        let registry = Self::new();
        registry.register(Arc::new(LocalMessengerProvider::new(bus)));
        registry.register(Arc::new(SqlMessengerProvider));
        #[cfg(feature = "postgres")]
        registry.register(Arc::new(super::postgres::PostgresMessengerProvider));
        #[cfg(feature = "redis")]
        registry.register(Arc::new(super::redis::RedisMessengerProvider));
        #[cfg(feature = "rabbitmq")]
        registry.register(Arc::new(super::rabbitmq::RabbitMqMessengerProvider));
        registry
    }

    /// Registers `provider`, replacing any provider with the same name.
    pub fn register(&self, provider: Arc<dyn MessengerProvider>) {
        let name = provider.name().to_lowercase();
        debug!(provider = %name, "Registered messenger provider");
        self.providers.write().insert(name, provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MessengerProvider>> {
        self.providers.read().get(&name.to_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.providers.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for MessengerRegistry {
    fn default() -> Self {
        Self::with_defaults(LocalBus::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_include_local_and_sql() {
        let registry = MessengerRegistry::default();
        assert!(registry.get("local").is_some());
        assert!(registry.get("SQL").is_some());
        assert!(registry.get("carrier-pigeon").is_none());
        assert!(registry.names().contains(&"local".to_string()));
    }
}
