use super::{PermissionHolder, Track};
use crate::types::{HolderId, UserId};

use dashmap::DashMap;
use std::sync::Arc;

/// Read access to loaded groups, used while walking inheritance.
pub trait GroupLookup: Send + Sync {
    fn group(&self, name: &str) -> Option<Arc<PermissionHolder>>;
}

/// Read access to loaded tracks, used by track-aware meta stack elements.
pub trait TrackLookup: Send + Sync {
    fn track(&self, name: &str) -> Option<Arc<Track>>;
}

#[derive(Default)]
pub struct GroupManager {
    groups: DashMap<String, Arc<PermissionHolder>>,
}

impl GroupManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<PermissionHolder>> {
        self.groups
            .get(&name.trim().to_lowercase())
            .map(|g| g.value().clone())
    }

    /// Returns the loaded group with this name, creating an empty one if
    /// needed, plus whether it was created.
    pub fn get_or_create(&self, name: &str) -> (Arc<PermissionHolder>, bool) {
        let id = HolderId::group(name);
        let mut created = false;
        let group = self
            .groups
            .entry(id.name.clone())
            .or_insert_with(|| {
                created = true;
                Arc::new(PermissionHolder::new_group(&id.name, Vec::new()))
            })
            .value()
            .clone();
        (group, created)
    }

    pub fn insert(&self, group: Arc<PermissionHolder>) {
        self.groups.insert(group.id().name.clone(), group);
    }

    pub fn remove(&self, name: &str) -> Option<Arc<PermissionHolder>> {
        self.groups
            .remove(&name.trim().to_lowercase())
            .map(|(_, g)| g)
    }

    pub fn names(&self) -> Vec<String> {
        self.groups.iter().map(|e| e.key().clone()).collect()
    }

    pub fn all(&self) -> Vec<Arc<PermissionHolder>> {
        self.groups.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl GroupLookup for GroupManager {
    fn group(&self, name: &str) -> Option<Arc<PermissionHolder>> {
        self.get(name)
    }
}

#[derive(Default)]
pub struct UserManager {
    users: DashMap<UserId, Arc<PermissionHolder>>,
}

impl UserManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, uuid: &UserId) -> Option<Arc<PermissionHolder>> {
        self.users.get(uuid).map(|u| u.value().clone())
    }

    pub fn insert(&self, uuid: UserId, user: Arc<PermissionHolder>) {
        self.users.insert(uuid, user);
    }

    pub fn remove(&self, uuid: &UserId) -> Option<Arc<PermissionHolder>> {
        self.users.remove(uuid).map(|(_, u)| u)
    }

    pub fn all(&self) -> Vec<Arc<PermissionHolder>> {
        self.users.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[derive(Default)]
pub struct TrackManager {
    tracks: DashMap<String, Arc<Track>>,
}

impl TrackManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, track: Track) {
        self.tracks.insert(track.name().to_string(), Arc::new(track));
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Track>> {
        self.tracks
            .remove(&name.trim().to_lowercase())
            .map(|(_, t)| t)
    }

    pub fn clear(&self) {
        self.tracks.clear();
    }

    pub fn all(&self) -> Vec<Arc<Track>> {
        self.tracks.iter().map(|e| e.value().clone()).collect()
    }
}

impl TrackLookup for TrackManager {
    fn track(&self, name: &str) -> Option<Arc<Track>> {
        self.tracks
            .get(&name.trim().to_lowercase())
            .map(|t| t.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_lookup_is_case_insensitive() {
        let manager = GroupManager::new();
        let (group, created) = manager.get_or_create("Admin");
        assert!(created);
        assert_eq!(group.id().name, "admin");
        let (_, created) = manager.get_or_create("ADMIN");
        assert!(!created);
        assert!(manager.group("admin").is_some());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_track_lookup() {
        let tracks = TrackManager::new();
        tracks.insert(Track::new("staff", vec!["mod".into()]));
        assert!(tracks.track("Staff").is_some());
        assert!(tracks.track("other").is_none());
    }
}
