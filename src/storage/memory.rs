use super::traits::{GroupRecord, Storage, UserRecord};
use crate::holder::Track;
use crate::types::UserId;
use crate::Result;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-local storage. Several engines may share one instance to
/// simulate processes sharing a database.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    users: DashMap<UserId, UserRecord>,
    groups: DashMap<String, GroupRecord>,
    tracks: DashMap<String, Track>,
    writes: AtomicU64,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of save/delete calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load_user(&self, uuid: UserId) -> Result<Option<UserRecord>> {
        Ok(self.users.get(&uuid).map(|u| u.value().clone()))
    }

    async fn save_user(&self, user: UserRecord) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.users.insert(user.uuid, user);
        Ok(())
    }

    async fn load_group(&self, name: &str) -> Result<Option<GroupRecord>> {
        Ok(self
            .groups
            .get(&name.to_lowercase())
            .map(|g| g.value().clone()))
    }

    async fn load_all_groups(&self) -> Result<Vec<GroupRecord>> {
        Ok(self.groups.iter().map(|g| g.value().clone()).collect())
    }

    async fn save_group(&self, group: GroupRecord) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.groups.insert(group.name.to_lowercase(), group);
        Ok(())
    }

    async fn delete_group(&self, name: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.groups.remove(&name.to_lowercase());
        Ok(())
    }

    async fn load_all_tracks(&self) -> Result<Vec<Track>> {
        Ok(self.tracks.iter().map(|t| t.value().clone()).collect())
    }

    async fn save_track(&self, track: Track) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.tracks.insert(track.name().to_string(), track);
        Ok(())
    }
}
