//! The engine ties holders, resolution, caching, storage and messaging
//! together.
//!
//! Holders are loaded from [`Storage`] into in-memory managers. Checks and
//! meta lookups resolve inheritance once per `(holder, QueryOptions)` and
//! cache the result on the holder. Mutations invalidate before returning,
//! are written back to storage and, when messaging is configured, announced
//! to other processes.

use crate::calculator::processor::ProcessorSupplier;
use crate::calculator::{CalculatorFactory, ProcessorSettings, TristateResult};
use crate::config::{Config, MetaStackConfig};
use crate::context::{ContextCalculator, ContextSet, QueryOptions, StaticContextCalculator};
use crate::error::{PermweaveError, Result};
use crate::holder::{
    CacheOutcome, GroupManager, HolderKind, PermissionHolder, Track, TrackLookup, TrackManager,
    UserManager,
};
use crate::inheritance::{InheritanceResolver, Resolution, ResolverSettings};
use crate::messaging::{
    ActionLogEntry, IncomingMessageHandler, LocalBus, MessagingService, MessengerRegistry,
};
use crate::meta::{ElementRegistry, MetaCache, MetaFactory, MetaStackDefinition};
use crate::metrics::Metrics;
use crate::node::Node;
use crate::storage::{GroupRecord, InMemoryStorage, Storage, UserRecord};
use crate::types::{CheckOrigin, HolderId, UserId};
use crate::verbose::{TracingVerboseSink, VerboseSink};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// Builder for [`Engine`]. Everything except the config is optional.
pub struct EngineBuilder {
    config: Config,
    storage: Option<Arc<dyn Storage>>,
    suppliers: Vec<Arc<dyn ProcessorSupplier>>,
    verbose: Option<Arc<dyn VerboseSink>>,
    messengers: Option<Arc<MessengerRegistry>>,
    context_calculators: Vec<Arc<dyn ContextCalculator>>,
    elements: Option<ElementRegistry>,
    metrics: Option<Arc<Metrics>>,
}

impl EngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            storage: None,
            suppliers: Vec::new(),
            verbose: None,
            messengers: None,
            context_calculators: Vec::new(),
            elements: None,
            metrics: None,
        }
    }

    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Adds a platform processor, run after the built-in ones.
    pub fn processor_supplier(mut self, supplier: Arc<dyn ProcessorSupplier>) -> Self {
        self.suppliers.push(supplier);
        self
    }

    pub fn verbose_sink(mut self, sink: Arc<dyn VerboseSink>) -> Self {
        self.verbose = Some(sink);
        self
    }

    pub fn messenger_registry(mut self, registry: Arc<MessengerRegistry>) -> Self {
        self.messengers = Some(registry);
        self
    }

    /// Adds a context calculator, consulted after the configured
    /// server/world calculator.
    pub fn context_calculator(mut self, calculator: Arc<dyn ContextCalculator>) -> Self {
        self.context_calculators.push(calculator);
        self
    }

    /// Custom meta stack elements must be registered before the engine is
    /// built, since the configured stacks are parsed here.
    pub fn element_registry(mut self, registry: ElementRegistry) -> Self {
        self.elements = Some(registry);
        self
    }

    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<Arc<Engine>> {
        self.config.validate()?;
        let config = self.config;

        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Metrics::new()?,
        };
        let verbose = self
            .verbose
            .unwrap_or_else(|| Arc::new(TracingVerboseSink::new(config.verbose.enabled)));
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(InMemoryStorage::new()));
        let messengers = self
            .messengers
            .unwrap_or_else(|| Arc::new(MessengerRegistry::with_defaults(LocalBus::new())));

        let mut context_calculators: Vec<Arc<dyn ContextCalculator>> =
            vec![Arc::new(StaticContextCalculator::new(
                &config.server.name,
                config.server.world.as_deref(),
            )?)];
        context_calculators.extend(self.context_calculators);

        let tracks = Arc::new(TrackManager::new());
        let elements = self.elements.unwrap_or_default();
        let prefix = stack_definition(&config.meta.prefix, &elements, &tracks)?;
        let suffix = stack_definition(&config.meta.suffix, &elements, &tracks)?;

        let calculators = CalculatorFactory::new(
            ProcessorSettings {
                apply_wildcards: config.calculation.apply_wildcards,
                apply_regex: config.calculation.apply_regex,
                apply_implicit_wildcards: config.calculation.apply_implicit_wildcards,
            },
            self.suppliers,
            verbose.clone(),
            Some(metrics.clone()),
        );
        let meta = MetaFactory::new(prefix, suffix, verbose.clone(), Some(metrics.clone()));
        let resolver_settings = ResolverSettings {
            traversal: config.calculation.inheritance_traversal,
            primary_group_fallback: config.calculation.primary_group_fallback,
        };

        info!(
            server = %config.server.name,
            storage = storage.name(),
            messaging = ?config.messaging.service,
            "Creating permission engine"
        );

        Ok(Arc::new_cyclic(|weak| Engine {
            config,
            storage,
            users: UserManager::new(),
            groups: GroupManager::new(),
            tracks,
            context_calculators,
            calculators,
            meta,
            resolver_settings,
            messengers,
            messaging: RwLock::new(None),
            verbose,
            metrics,
            state: RwLock::new(EngineState::Created),
            shutdown: CancellationToken::new(),
            background_tasks: Mutex::new(Vec::new()),
            self_ref: weak.clone(),
        }))
    }
}

fn stack_definition(
    config: &MetaStackConfig,
    elements: &ElementRegistry,
    tracks: &Arc<TrackManager>,
) -> Result<Arc<MetaStackDefinition>> {
    let lookup: Arc<dyn TrackLookup> = tracks.clone();
    let parsed = elements.parse_all(&config.format, Some(lookup))?;
    Ok(Arc::new(MetaStackDefinition::new(
        parsed,
        config.duplicates,
        &config.start_spacer,
        &config.middle_spacer,
        &config.end_spacer,
    )))
}

pub struct Engine {
    config: Config,
    storage: Arc<dyn Storage>,
    users: UserManager,
    groups: GroupManager,
    tracks: Arc<TrackManager>,
    context_calculators: Vec<Arc<dyn ContextCalculator>>,
    calculators: CalculatorFactory,
    meta: MetaFactory,
    resolver_settings: ResolverSettings,
    messengers: Arc<MessengerRegistry>,
    messaging: RwLock<Option<Arc<MessagingService>>>,
    verbose: Arc<dyn VerboseSink>,
    metrics: Arc<Metrics>,
    state: RwLock<EngineState>,
    shutdown: CancellationToken,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
    self_ref: Weak<Engine>,
}

impl Engine {
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn verbose(&self) -> &Arc<dyn VerboseSink> {
        &self.verbose
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn messaging(&self) -> Option<Arc<MessagingService>> {
        self.messaging.read().clone()
    }

    // ---- lifecycle ----

    /// Loads groups and tracks, connects messaging and starts the expiry
    /// sweeper.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state != EngineState::Created {
                return Err(PermweaveError::InvalidConfig(format!(
                    "engine cannot be started from state {:?}",
                    *state
                )));
            }
            *state = EngineState::Running;
        }

        self.load_all_groups().await?;
        self.load_all_tracks().await?;

        if let Some(provider_name) = self.config.messaging.service.provider_name() {
            let provider = self.messengers.get(provider_name).ok_or_else(|| {
                PermweaveError::InvalidConfig(format!(
                    "no messenger provider registered for '{}'",
                    provider_name
                ))
            })?;
            let handler = Arc::new(EngineMessageHandler {
                engine: self.self_ref.clone(),
            });
            let service = MessagingService::connect(
                provider,
                handler,
                &self.config.messaging,
                Some(self.metrics.clone()),
            )
            .await?;
            *self.messaging.write() = Some(service);
        }

        let sweeper = tokio::spawn(expiry_sweeper(
            self.self_ref.clone(),
            Duration::from_millis(self.config.expiry.check_interval_ms),
            self.shutdown.clone(),
        ));
        self.background_tasks.lock().push(sweeper);

        info!(
            groups = self.groups.len(),
            tracks = self.tracks.all().len(),
            "Permission engine started"
        );
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if matches!(*state, EngineState::Stopping | EngineState::Stopped) {
                return Ok(());
            }
            *state = EngineState::Stopping;
        }
        info!("Shutting down permission engine");

        self.shutdown.cancel();
        let service = self.messaging.write().take();
        if let Some(service) = service {
            if let Err(e) = service.close().await {
                warn!(error = %e, "Failed to close messaging service");
            }
        }

        let tasks: Vec<_> = self.background_tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Background task failed during shutdown");
            }
        }

        *self.state.write() = EngineState::Stopped;
        info!("Permission engine stopped");
        Ok(())
    }

    // ---- loading ----

    /// Loads a user, creating and saving a fresh record (member of the
    /// default group) if storage has none. Reloading a loaded user refreshes
    /// it in place.
    pub async fn load_user(
        &self,
        uuid: UserId,
        username: Option<&str>,
    ) -> Result<Arc<PermissionHolder>> {
        let (mut record, created) = match self.storage.load_user(uuid).await? {
            Some(record) => (record, false),
            None => {
                let default_group = self.config.calculation.default_group.clone();
                let record = UserRecord {
                    uuid,
                    username: username.map(str::to_string),
                    primary_group: default_group.clone(),
                    nodes: vec![Node::inheritance(&default_group)?],
                };
                (record, true)
            }
        };

        let mut dirty = created;
        if let Some(username) = username {
            if record.username.as_deref() != Some(username) {
                record.username = Some(username.to_string());
                dirty = true;
            }
        }

        let user = match self.users.get(&uuid) {
            Some(user) => {
                user.set_username(record.username.clone());
                user.set_primary_group(&record.primary_group);
                user.set_nodes(record.nodes.clone());
                user.invalidate();
                self.metrics.cache_invalidations.inc();
                user
            }
            None => {
                let user = Arc::new(PermissionHolder::new_user(
                    uuid,
                    record.username.clone(),
                    &record.primary_group,
                    record.nodes.clone(),
                ));
                self.users.insert(uuid, user.clone());
                self.metrics.loaded_users.set(self.users.len() as i64);
                user
            }
        };

        if dirty {
            self.storage.save_user(record).await?;
        }
        debug!(user = %uuid, created, "Loaded user");
        Ok(user)
    }

    pub fn unload_user(&self, uuid: &UserId) -> bool {
        let removed = self.users.remove(uuid).is_some();
        if removed {
            self.metrics.loaded_users.set(self.users.len() as i64);
            debug!(user = %uuid, "Unloaded user");
        }
        removed
    }

    pub fn get_user(&self, uuid: &UserId) -> Option<Arc<PermissionHolder>> {
        self.users.get(uuid)
    }

    pub fn get_group(&self, name: &str) -> Option<Arc<PermissionHolder>> {
        self.groups.get(name)
    }

    pub fn users(&self) -> Vec<Arc<PermissionHolder>> {
        self.users.all()
    }

    pub fn groups(&self) -> Vec<Arc<PermissionHolder>> {
        self.groups.all()
    }

    pub fn tracks(&self) -> Vec<Arc<Track>> {
        self.tracks.all()
    }

    /// Reloads one group from storage. A group missing from storage is
    /// dropped from memory.
    pub async fn load_group(&self, name: &str) -> Result<Option<Arc<PermissionHolder>>> {
        match self.storage.load_group(name).await? {
            Some(record) => Ok(Some(self.apply_group_record(record))),
            None => {
                if let Some(group) = self.groups.remove(name) {
                    group.invalidate();
                    self.invalidate_all();
                    self.metrics.loaded_groups.set(self.groups.len() as i64);
                }
                Ok(None)
            }
        }
    }

    /// Reloads every group, returning how many are loaded.
    pub async fn load_all_groups(&self) -> Result<usize> {
        let records = self.storage.load_all_groups().await?;
        let names: HashSet<String> = records.iter().map(|r| HolderId::group(&r.name).name).collect();

        for record in records {
            self.apply_group_record(record);
        }

        let mut removed = false;
        for stale in self.groups.names().into_iter().filter(|n| !names.contains(n)) {
            if let Some(group) = self.groups.remove(&stale) {
                group.invalidate();
                removed = true;
            }
        }
        if removed {
            self.invalidate_all();
        }

        self.metrics.loaded_groups.set(self.groups.len() as i64);
        Ok(self.groups.len())
    }

    fn apply_group_record(&self, record: GroupRecord) -> Arc<PermissionHolder> {
        let (group, created) = self.groups.get_or_create(&record.name);
        let changed = group.set_nodes(record.nodes);
        if created {
            // cached resolutions may have skipped this group while it was missing
            self.invalidate_all();
            self.metrics.loaded_groups.set(self.groups.len() as i64);
        } else if changed {
            self.invalidate_holder(&group);
        }
        group
    }

    pub async fn load_all_tracks(&self) -> Result<usize> {
        let tracks = self.storage.load_all_tracks().await?;
        self.tracks.clear();
        let count = tracks.len();
        for track in tracks {
            self.tracks.insert(track);
        }
        // track-aware stack elements read tracks during meta accumulation
        self.invalidate_all_meta();
        Ok(count)
    }

    /// Creates a group, or returns the existing one. A group already in
    /// storage is loaded as stored rather than overwritten.
    pub async fn create_group(&self, name: &str) -> Result<Arc<PermissionHolder>> {
        if let Some(group) = self.groups.get(name) {
            return Ok(group);
        }
        if let Some(record) = self.storage.load_group(name).await? {
            debug!(group = %record.name, "Group already stored, loading instead of creating");
            return Ok(self.apply_group_record(record));
        }
        let group = self.apply_group_record(GroupRecord {
            name: HolderId::group(name).name,
            nodes: Vec::new(),
        });
        self.save(&group).await?;
        self.push_change(&group, "create");
        Ok(group)
    }

    pub async fn delete_group(&self, name: &str) -> Result<bool> {
        let Some(group) = self.groups.remove(name) else {
            return Ok(false);
        };
        group.invalidate();
        self.invalidate_all();
        self.metrics.loaded_groups.set(self.groups.len() as i64);
        self.storage.delete_group(&group.id().name).await?;
        self.push_change(&group, "delete");
        Ok(true)
    }

    pub async fn save_track(&self, track: Track) -> Result<()> {
        self.tracks.insert(track.clone());
        self.invalidate_all_meta();
        self.storage.save_track(track).await?;
        self.push_update();
        Ok(())
    }

    // ---- queries ----

    /// Query options for `holder` in its current situation, built from every
    /// registered context calculator.
    pub fn query_options_for(&self, holder: &HolderId) -> QueryOptions {
        let contexts = self
            .context_calculators
            .iter()
            .fold(ContextSet::empty(), |acc, calculator| {
                acc.merge(&calculator.calculate(holder))
            });
        QueryOptions::contextual(contexts)
            .with_satisfy_mode(self.config.calculation.context_satisfy_mode)
    }

    fn resolve(&self, holder: &Arc<PermissionHolder>, query: &QueryOptions) -> Resolution {
        InheritanceResolver::new(&self.groups, self.resolver_settings).resolve(
            holder,
            query,
            Utc::now(),
        )
    }

    fn record_cache(&self, outcome: CacheOutcome) {
        match outcome {
            CacheOutcome::Hit => self.metrics.calculator_cache_hits.inc(),
            CacheOutcome::Miss => self.metrics.calculator_cache_misses.inc(),
        }
    }

    pub fn check_permission(
        &self,
        holder: &Arc<PermissionHolder>,
        permission: &str,
        query: &QueryOptions,
        origin: CheckOrigin,
    ) -> TristateResult {
        let (calculator, outcome) = holder.cached().permission_calculator(query, || {
            let resolution = self.resolve(holder, query);
            let calculator = self.calculators.build(holder.id(), query, &resolution);
            (calculator, resolution.into_validity())
        });
        self.record_cache(outcome);
        calculator.check(permission, origin)
    }

    /// Checks `permission` under the holder's current contexts.
    pub fn has_permission(&self, holder: &Arc<PermissionHolder>, permission: &str) -> TristateResult {
        let query = self.query_options_for(holder.id());
        self.check_permission(holder, permission, &query, CheckOrigin::PlatformPermissionCheck)
    }

    pub fn meta_data(&self, holder: &Arc<PermissionHolder>, query: &QueryOptions) -> Arc<MetaCache> {
        let (meta, outcome) = holder.cached().meta_data(query, || {
            let resolution = self.resolve(holder, query);
            let meta = self
                .meta
                .build(holder.id(), holder.primary_group(), query, &resolution);
            (meta, resolution.into_validity())
        });
        self.record_cache(outcome);
        meta
    }

    // ---- mutations ----

    pub async fn add_node(&self, holder: &Arc<PermissionHolder>, node: Node) -> Result<bool> {
        let description = format!("set {} {}", node.key(), node.value());
        if !holder.set_node(node) {
            return Ok(false);
        }
        self.after_mutation(holder, &description).await?;
        Ok(true)
    }

    pub async fn remove_node(&self, holder: &Arc<PermissionHolder>, node: &Node) -> Result<bool> {
        if !holder.unset_node(node) {
            return Ok(false);
        }
        self.after_mutation(holder, &format!("unset {}", node.key()))
            .await?;
        Ok(true)
    }

    pub async fn set_nodes(&self, holder: &Arc<PermissionHolder>, nodes: Vec<Node>) -> Result<bool> {
        if !holder.set_nodes(nodes) {
            return Ok(false);
        }
        self.after_mutation(holder, "replace nodes").await?;
        Ok(true)
    }

    pub async fn set_primary_group(&self, user: &Arc<PermissionHolder>, group: &str) -> Result<bool> {
        let group = HolderId::group(group).name;
        match user.primary_group() {
            None => {
                return Err(PermweaveError::InvalidNode(format!(
                    "{} has no primary group",
                    user.id()
                )))
            }
            Some(current) if current == group => return Ok(false),
            Some(_) => {}
        }
        if self.groups.get(&group).is_none() {
            return Err(PermweaveError::NotFound(format!("group {}", group)));
        }
        user.set_primary_group(&group);
        self.after_mutation(user, &format!("primary group {}", group))
            .await?;
        Ok(true)
    }

    async fn after_mutation(&self, holder: &Arc<PermissionHolder>, description: &str) -> Result<()> {
        self.invalidate_holder(holder);
        self.save(holder).await?;
        self.push_change(holder, description);
        Ok(())
    }

    /// Writes a holder back to storage.
    pub async fn save(&self, holder: &Arc<PermissionHolder>) -> Result<()> {
        let nodes = holder.nodes().as_ref().clone();
        match holder.kind() {
            HolderKind::User(_) => {
                let uuid = holder.uuid().ok_or_else(|| {
                    PermweaveError::Storage(format!("{} has no uuid", holder.id()))
                })?;
                self.storage
                    .save_user(UserRecord {
                        uuid,
                        username: holder.username(),
                        primary_group: holder
                            .primary_group()
                            .unwrap_or_else(|| self.config.calculation.default_group.clone()),
                        nodes,
                    })
                    .await
            }
            HolderKind::Group => {
                self.storage
                    .save_group(GroupRecord {
                        name: holder.id().name.clone(),
                        nodes,
                    })
                    .await
            }
        }
    }

    /// Removes expired temporary nodes from every loaded holder, returning
    /// how many were removed.
    pub async fn expire_temporary_nodes(&self) -> Result<usize> {
        let now = Utc::now();
        let mut total = 0;
        let holders = self.groups.all().into_iter().chain(self.users.all());
        for holder in holders {
            let expired = holder.remove_expired(now);
            if expired.is_empty() {
                continue;
            }
            total += expired.len();
            debug!(holder = %holder.id(), count = expired.len(), "Removed expired nodes");
            self.after_mutation(&holder, "expire temporary nodes").await?;
        }
        Ok(total)
    }

    /// Reloads everything from storage and drops every cached calculator.
    pub async fn sync(&self) -> Result<()> {
        info!("Performing full sync");
        self.load_all_groups().await?;
        self.load_all_tracks().await?;
        for user in self.users.all() {
            if let Some(uuid) = user.uuid() {
                self.load_user(uuid, None).await?;
            }
        }
        self.invalidate_all();
        Ok(())
    }

    // ---- invalidation ----

    /// Invalidates `holder` and every loaded holder with cached data built
    /// from it.
    pub fn invalidate_holder(&self, holder: &PermissionHolder) {
        holder.invalidate();
        self.metrics.cache_invalidations.inc();
        if !holder.is_group() {
            return;
        }
        let id = holder.id();
        for dependent in self.users.all().into_iter().chain(self.groups.all()) {
            if dependent.id() != id && dependent.cached().depends_on(id) {
                dependent.invalidate();
                self.metrics.cache_invalidations.inc();
            }
        }
    }

    pub fn invalidate_all(&self) {
        for holder in self.users.all().into_iter().chain(self.groups.all()) {
            holder.invalidate();
        }
        self.metrics.cache_invalidations.inc();
    }

    fn invalidate_all_meta(&self) {
        // meta and permission caches share one generation
        self.invalidate_all();
    }

    // ---- network ----

    fn push_update(&self) {
        if !self.config.messaging.auto_push_updates {
            return;
        }
        if let Some(service) = self.messaging() {
            service.push_update_buffered();
        }
    }

    /// Announces a change to `holder`. Never blocks on the transport.
    fn push_change(&self, holder: &PermissionHolder, description: &str) {
        let Some(service) = self.messaging() else {
            return;
        };

        if self.config.messaging.auto_push_updates {
            match holder.uuid() {
                Some(uuid) => {
                    let service = service.clone();
                    tokio::spawn(async move {
                        if let Err(e) = service.push_user_update(uuid).await {
                            warn!(user = %uuid, error = %e, "Failed to push user update");
                        }
                    });
                }
                None => service.push_update_buffered(),
            }
        }

        if self.config.messaging.push_log_entries {
            let entry = ActionLogEntry::now(&self.config.server.name, &holder.id().to_string(), description);
            tokio::spawn(async move {
                if let Err(e) = service.push_log(entry).await {
                    warn!(error = %e, "Failed to push log entry");
                }
            });
        }
    }
}

async fn expiry_sweeper(engine: Weak<Engine>, every: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        let Some(engine) = engine.upgrade() else {
            break;
        };
        match engine.expire_temporary_nodes().await {
            Ok(0) => {}
            Ok(count) => debug!(count, "Expired temporary nodes"),
            Err(e) => warn!(error = %e, "Failed to expire temporary nodes"),
        }
    }
    debug!("Expiry sweeper stopped");
}

/// Applies incoming network messages to an engine.
struct EngineMessageHandler {
    engine: Weak<Engine>,
}

#[async_trait]
impl IncomingMessageHandler for EngineMessageHandler {
    async fn on_update_request(&self) {
        let Some(engine) = self.engine.upgrade() else {
            return;
        };
        if let Err(e) = engine.sync().await {
            warn!(error = %e, "Failed to sync after update request");
        }
    }

    async fn on_user_update(&self, uuid: Uuid) {
        let Some(engine) = self.engine.upgrade() else {
            return;
        };
        if engine.get_user(&uuid).is_none() {
            return;
        }
        if let Err(e) = engine.load_user(uuid, None).await {
            warn!(user = %uuid, error = %e, "Failed to reload user after update");
        }
    }

    async fn on_log_entry(&self, entry: ActionLogEntry) {
        info!(
            source = %entry.source,
            target = %entry.target,
            timestamp = entry.timestamp,
            "[network] {}",
            entry.description
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::Tristate;
    use crate::context::QueryOptions;

    fn engine() -> Arc<Engine> {
        Engine::builder(Config::default()).build().unwrap()
    }

    #[tokio::test]
    async fn test_new_user_joins_default_group() {
        let engine = engine();
        let uuid = Uuid::new_v4();
        let user = engine.load_user(uuid, Some("alice")).await.unwrap();

        assert_eq!(user.primary_group().as_deref(), Some("default"));
        assert!(user.nodes().contains(&Node::inheritance("default").unwrap()));

        let stored = engine.storage().load_user(uuid).await.unwrap().unwrap();
        assert_eq!(stored.username.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_mutation_is_visible_immediately() {
        let engine = engine();
        let group = engine.create_group("default").await.unwrap();
        let user = engine.load_user(Uuid::new_v4(), None).await.unwrap();
        let query = QueryOptions::default();

        let before = engine.check_permission(&user, "fly", &query, CheckOrigin::Internal);
        assert_eq!(before.result(), Tristate::Undefined);

        engine
            .add_node(&group, Node::permission("fly", true).unwrap())
            .await
            .unwrap();
        let after = engine.check_permission(&user, "fly", &query, CheckOrigin::Internal);
        assert_eq!(after.result(), Tristate::True);
        assert_eq!(after.origin(), Some(&HolderId::group("default")));
    }

    #[tokio::test]
    async fn test_calculators_are_cached_per_query() {
        let engine = engine();
        let user = engine.load_user(Uuid::new_v4(), None).await.unwrap();
        let query = QueryOptions::default();

        engine.check_permission(&user, "a", &query, CheckOrigin::Internal);
        engine.check_permission(&user, "b", &query, CheckOrigin::Internal);
        assert_eq!(engine.metrics().calculator_cache_misses.get(), 1);
        assert_eq!(engine.metrics().calculator_cache_hits.get(), 1);

        engine.check_permission(&user, "a", &QueryOptions::non_contextual(), CheckOrigin::Internal);
        assert_eq!(user.cached().calculator_count(), 2);
    }

    #[tokio::test]
    async fn test_create_group_keeps_stored_nodes() {
        let storage = Arc::new(InMemoryStorage::new());
        storage
            .save_group(GroupRecord {
                name: "staff".into(),
                nodes: vec![Node::permission("kick", true).unwrap()],
            })
            .await
            .unwrap();
        let writes = storage.write_count();

        let engine = Engine::builder(Config::default())
            .storage(storage.clone())
            .build()
            .unwrap();
        let staff = engine.create_group("Staff").await.unwrap();

        assert_eq!(staff.nodes().as_slice(), &[Node::permission("kick", true).unwrap()]);
        assert_eq!(storage.write_count(), writes);
        let stored = storage.load_group("staff").await.unwrap().unwrap();
        assert_eq!(stored.nodes, vec![Node::permission("kick", true).unwrap()]);

        engine.create_group("mods").await.unwrap();
        assert!(storage.load_group("mods").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_primary_group_change() {
        let engine = engine();
        let staff = engine.create_group("staff").await.unwrap();
        engine
            .add_node(&staff, Node::permission("kick", true).unwrap())
            .await
            .unwrap();

        let user = engine.load_user(Uuid::new_v4(), None).await.unwrap();
        // drop the explicit default membership so the primary group fallback applies
        engine.set_nodes(&user, Vec::new()).await.unwrap();
        assert_eq!(engine.has_permission(&user, "kick").result(), Tristate::Undefined);

        assert!(engine.set_primary_group(&user, "Staff").await.unwrap());
        assert!(!engine.set_primary_group(&user, "staff").await.unwrap());
        assert!(matches!(
            engine.set_primary_group(&user, "ghost").await,
            Err(PermweaveError::NotFound(_))
        ));
        assert_eq!(user.primary_group().as_deref(), Some("staff"));
        assert_eq!(engine.has_permission(&user, "kick").result(), Tristate::True);
    }

    #[tokio::test]
    async fn test_expired_nodes_are_swept() {
        let engine = engine();
        let user = engine.load_user(Uuid::new_v4(), None).await.unwrap();
        let expired = Node::builder("temp.fly")
            .expiry(Utc::now() - chrono::Duration::seconds(5))
            .build()
            .unwrap();
        user.set_node(expired);

        assert_eq!(engine.expire_temporary_nodes().await.unwrap(), 1);
        assert!(user.nodes().iter().all(|n| n.key() != "temp.fly"));
        assert_eq!(engine.expire_temporary_nodes().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_server_context_from_config() {
        let mut config = Config::default();
        config.server.name = "survival".into();
        let engine = Engine::builder(config).build().unwrap();
        let user = engine.load_user(Uuid::new_v4(), None).await.unwrap();

        let node = Node::builder("chat.colour")
            .context("server", "survival")
            .build()
            .unwrap();
        engine.add_node(&user, node).await.unwrap();

        assert_eq!(engine.has_permission(&user, "chat.colour").result(), Tristate::True);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let engine = engine();
        engine.start().await.unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        assert!(engine.start().await.is_err());

        engine.shutdown().await.unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn test_unknown_messenger_fails_start() {
        let mut config = Config::default();
        config.messaging.service = crate::config::MessagingServiceKind::Sql;
        let engine = Engine::builder(config)
            .messenger_registry(Arc::new(MessengerRegistry::new()))
            .build()
            .unwrap();
        assert!(matches!(
            engine.start().await,
            Err(PermweaveError::InvalidConfig(_))
        ));
    }
}
