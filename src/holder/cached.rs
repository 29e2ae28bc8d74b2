//! Per-holder calculator and meta caches.
//!
//! Every holder carries a generation counter. A cached entry records the
//! generation of each holder it was built from (the holder itself plus every
//! group reached through inheritance), captured before that holder's node
//! snapshot was read. An entry is served only while all recorded
//! generations are still current, so invalidating a group is enough to
//! retire every calculator that was built from it, including ones still
//! being built when the invalidation happened.
//!
//! An entry built from temporary nodes also expires with the earliest of
//! them, so an expired grant is never served between expiry sweeps.

use super::PermissionHolder;
use crate::calculator::PermissionCalculator;
use crate::context::QueryOptions;
use crate::meta::MetaCache;
use crate::types::HolderId;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Generation of one holder as observed while building a cache entry.
#[derive(Debug, Clone)]
pub struct DependencyStamp {
    id: HolderId,
    holder: Weak<PermissionHolder>,
    generation: u64,
}

impl DependencyStamp {
    /// Must be taken before the holder's node snapshot is read.
    pub fn capture(holder: &Arc<PermissionHolder>) -> Self {
        Self {
            id: holder.id().clone(),
            holder: Arc::downgrade(holder),
            generation: holder.cached().generation(),
        }
    }

    pub fn id(&self) -> &HolderId {
        &self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self) -> bool {
        match self.holder.upgrade() {
            Some(holder) => holder.cached().generation() == self.generation,
            None => false,
        }
    }
}

/// How long a cache entry may be served.
#[derive(Debug, Clone, Default)]
pub struct Validity {
    dependencies: Vec<DependencyStamp>,
    valid_until: Option<DateTime<Utc>>,
}

impl Validity {
    /// `valid_until` is the earliest expiry among the nodes the entry was
    /// built from.
    pub fn new(dependencies: Vec<DependencyStamp>, valid_until: Option<DateTime<Utc>>) -> Self {
        Self {
            dependencies,
            valid_until,
        }
    }

    pub fn dependencies(&self) -> &[DependencyStamp] {
        &self.dependencies
    }

    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.valid_until
    }

    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.map_or(true, |until| now < until)
            && self.dependencies.iter().all(DependencyStamp::is_current)
    }

    fn depends_on(&self, id: &HolderId) -> bool {
        self.dependencies.iter().any(|d| &d.id == id)
    }
}

struct CacheEntry<T> {
    value: Arc<T>,
    validity: Arc<Validity>,
}

impl<T> Clone for CacheEntry<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            validity: self.validity.clone(),
        }
    }
}

/// Whether a lookup was answered from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

#[derive(Default)]
pub struct HolderCachedData {
    generation: AtomicU64,
    permissions: DashMap<QueryOptions, CacheEntry<PermissionCalculator>>,
    meta: DashMap<QueryOptions, CacheEntry<MetaCache>>,
}

impl HolderCachedData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Returns the calculator for `query`, building it with `build` when no
    /// current one is cached.
    pub fn permission_calculator<F>(
        &self,
        query: &QueryOptions,
        build: F,
    ) -> (Arc<PermissionCalculator>, CacheOutcome)
    where
        F: FnOnce() -> (PermissionCalculator, Validity),
    {
        lookup(&self.permissions, query, build)
    }

    pub fn meta_data<F>(&self, query: &QueryOptions, build: F) -> (Arc<MetaCache>, CacheOutcome)
    where
        F: FnOnce() -> (MetaCache, Validity),
    {
        lookup(&self.meta, query, build)
    }

    /// Retires every entry. The generation is bumped before the maps are
    /// cleared so an entry inserted concurrently by a stale builder is never
    /// served.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.permissions.clear();
        self.meta.clear();
    }

    /// Whether any cached entry was built from `id`.
    pub fn depends_on(&self, id: &HolderId) -> bool {
        self.permissions.iter().any(|e| e.value().validity.depends_on(id))
            || self.meta.iter().any(|e| e.value().validity.depends_on(id))
    }

    pub fn calculator_count(&self) -> usize {
        self.permissions.len()
    }
}

fn lookup<T, F>(
    map: &DashMap<QueryOptions, CacheEntry<T>>,
    query: &QueryOptions,
    build: F,
) -> (Arc<T>, CacheOutcome)
where
    F: FnOnce() -> (T, Validity),
{
    let cached = map.get(query).map(|e| e.value().clone());
    if let Some(entry) = cached {
        if entry.validity.is_current(Utc::now()) {
            return (entry.value, CacheOutcome::Hit);
        }
    }

    let (value, validity) = build();
    let entry = CacheEntry {
        value: Arc::new(value),
        validity: Arc::new(validity),
    };
    let value = entry.value.clone();
    map.insert(query.clone(), entry);
    (value, CacheOutcome::Miss)
}
