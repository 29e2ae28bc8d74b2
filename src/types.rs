use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type GroupName = String;
pub type TrackName = String;
pub type UserId = Uuid;

/// The two kinds of permission holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HolderType {
    User,
    Group,
}

impl fmt::Display for HolderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HolderType::User => write!(f, "user"),
            HolderType::Group => write!(f, "group"),
        }
    }
}

/// Stable identity of a holder. Users are keyed by their uuid string, groups
/// by their lower-cased name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HolderId {
    pub holder_type: HolderType,
    pub name: String,
}

impl HolderId {
    pub fn user(uuid: Uuid) -> Self {
        Self {
            holder_type: HolderType::User,
            name: uuid.to_string(),
        }
    }

    pub fn group(name: &str) -> Self {
        Self {
            holder_type: HolderType::Group,
            name: name.trim().to_lowercase(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.holder_type == HolderType::User
    }

    pub fn is_group(&self) -> bool {
        self.holder_type == HolderType::Group
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.holder_type, self.name)
    }
}

/// Where a permission check was requested from. Only used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOrigin {
    /// A check made by the platform on behalf of a subject.
    PlatformPermissionCheck,
    /// A lookup made through the public API.
    ThirdPartyApi,
    /// A check made while resolving something else internally.
    Internal,
}

impl fmt::Display for CheckOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckOrigin::PlatformPermissionCheck => "platform",
            CheckOrigin::ThirdPartyApi => "api",
            CheckOrigin::Internal => "internal",
        };
        f.write_str(s)
    }
}
