pub mod cached;
pub mod manager;
pub mod node_map;
pub mod track;

pub use cached::{CacheOutcome, DependencyStamp, HolderCachedData, Validity};
pub use manager::{GroupLookup, GroupManager, TrackLookup, TrackManager, UserManager};
pub use node_map::NodeMap;
pub use track::Track;

use crate::node::{Node, NodeType};
use crate::types::{HolderId, UserId};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// User-only state.
#[derive(Debug)]
pub struct UserState {
    uuid: UserId,
    username: RwLock<Option<String>>,
    primary_group: RwLock<String>,
}

#[derive(Debug)]
pub enum HolderKind {
    User(UserState),
    Group,
}

/// A user or group together with its nodes and cached resolution data.
pub struct PermissionHolder {
    id: HolderId,
    kind: HolderKind,
    nodes: NodeMap,
    cached: HolderCachedData,
}

impl PermissionHolder {
    pub fn new_user(
        uuid: UserId,
        username: Option<String>,
        primary_group: &str,
        nodes: Vec<Node>,
    ) -> Self {
        Self {
            id: HolderId::user(uuid),
            kind: HolderKind::User(UserState {
                uuid,
                username: RwLock::new(username),
                primary_group: RwLock::new(primary_group.trim().to_lowercase()),
            }),
            nodes: NodeMap::new(nodes),
            cached: HolderCachedData::new(),
        }
    }

    pub fn new_group(name: &str, nodes: Vec<Node>) -> Self {
        Self {
            id: HolderId::group(name),
            kind: HolderKind::Group,
            nodes: NodeMap::new(nodes),
            cached: HolderCachedData::new(),
        }
    }

    pub fn id(&self) -> &HolderId {
        &self.id
    }

    pub fn kind(&self) -> &HolderKind {
        &self.kind
    }

    pub fn is_user(&self) -> bool {
        matches!(self.kind, HolderKind::User(_))
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, HolderKind::Group)
    }

    pub fn uuid(&self) -> Option<UserId> {
        match &self.kind {
            HolderKind::User(state) => Some(state.uuid),
            HolderKind::Group => None,
        }
    }

    pub fn username(&self) -> Option<String> {
        match &self.kind {
            HolderKind::User(state) => state.username.read().clone(),
            HolderKind::Group => None,
        }
    }

    pub fn set_username(&self, username: Option<String>) {
        if let HolderKind::User(state) = &self.kind {
            *state.username.write() = username;
        }
    }

    pub fn primary_group(&self) -> Option<String> {
        match &self.kind {
            HolderKind::User(state) => Some(state.primary_group.read().clone()),
            HolderKind::Group => None,
        }
    }

    /// Returns false for groups, which have no primary group.
    pub fn set_primary_group(&self, group: &str) -> bool {
        match &self.kind {
            HolderKind::User(state) => {
                *state.primary_group.write() = group.trim().to_lowercase();
                true
            }
            HolderKind::Group => false,
        }
    }

    pub fn nodes(&self) -> Arc<Vec<Node>> {
        self.nodes.snapshot()
    }

    pub fn node_map(&self) -> &NodeMap {
        &self.nodes
    }

    pub fn cached(&self) -> &HolderCachedData {
        &self.cached
    }

    /// Adds a node. Callers are responsible for invalidating caches.
    pub fn set_node(&self, node: Node) -> bool {
        self.nodes.add(node)
    }

    pub fn unset_node(&self, node: &Node) -> bool {
        self.nodes.remove(node)
    }

    pub fn set_nodes(&self, nodes: Vec<Node>) -> bool {
        self.nodes.replace(nodes)
    }

    /// Drops temporary nodes that have expired at `now`.
    pub fn remove_expired(&self, now: DateTime<Utc>) -> Vec<Node> {
        self.nodes.remove_matching(|n| n.has_expired(now))
    }

    /// The highest global `weight.<n>` node, or zero.
    pub fn weight(&self) -> i32 {
        let now = Utc::now();
        self.nodes
            .snapshot()
            .iter()
            .filter(|n| n.value() && n.contexts().is_empty() && !n.has_expired(now))
            .filter_map(|n| match n.node_type() {
                NodeType::Weight { weight } => Some(weight),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Display name: the first global `displayname.<name>` node, falling
    /// back to the username or group name.
    pub fn display_name(&self) -> String {
        let explicit = self.nodes.snapshot().iter().find_map(|n| {
            if !n.value() || !n.contexts().is_empty() {
                return None;
            }
            match n.node_type() {
                NodeType::DisplayName { name } => Some(name),
                _ => None,
            }
        });
        explicit
            .or_else(|| self.username())
            .unwrap_or_else(|| self.id.name.clone())
    }

    pub fn invalidate(&self) {
        self.cached.invalidate();
    }
}

impl fmt::Debug for PermissionHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionHolder")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("nodes", &self.nodes.len())
            .field("generation", &self.cached.generation())
            .finish()
    }
}

impl fmt::Display for PermissionHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.username() {
            Some(name) => write!(f, "{} ({})", name, self.id),
            None => write!(f, "{}", self.id),
        }
    }
}
