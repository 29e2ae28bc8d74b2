use crate::holder::Track;
use crate::node::Node;
use crate::types::UserId;
use crate::Result;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub uuid: UserId,
    pub username: Option<String>,
    pub primary_group: String,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub name: String,
    pub nodes: Vec<Node>,
}

/// Source of truth for holder data. Durability and transactions are the
/// implementation's concern.
#[async_trait]
pub trait Storage: Send + Sync {
    fn name(&self) -> &str;

    async fn load_user(&self, uuid: UserId) -> Result<Option<UserRecord>>;
    async fn save_user(&self, user: UserRecord) -> Result<()>;

    async fn load_group(&self, name: &str) -> Result<Option<GroupRecord>>;
    async fn load_all_groups(&self) -> Result<Vec<GroupRecord>>;
    async fn save_group(&self, group: GroupRecord) -> Result<()>;
    async fn delete_group(&self, name: &str) -> Result<()>;

    async fn load_all_tracks(&self) -> Result<Vec<Track>>;
    async fn save_track(&self, track: Track) -> Result<()>;
}
