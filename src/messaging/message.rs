//! Wire format of invalidation messages.
//!
//! Every message is a small JSON object `{"id": uuid, "type": string,
//! "content": optional}` carried as a UTF-8 string by the transport.

use crate::error::{PermweaveError, Result};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const UPDATE_TYPE: &str = "update";
pub const USER_UPDATE_TYPE: &str = "userupdate";
pub const LOG_TYPE: &str = "log";
pub const CUSTOM_TYPE: &str = "custom";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEnvelope {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

impl RawEnvelope {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        Ok(serde_json::from_str(encoded)?)
    }
}

/// An audit entry broadcast to other processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionLogEntry {
    /// Seconds since the epoch.
    pub timestamp: i64,
    pub source: String,
    pub target: String,
    pub description: String,
}

impl ActionLogEntry {
    pub fn now(source: &str, target: &str, description: &str) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp(),
            source: source.to_string(),
            target: target.to_string(),
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserUpdateContent {
    user_uuid: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomContent {
    channel_id: String,
    payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Recompute everything.
    Update,
    /// Recompute one user.
    UserUpdate { user_uuid: Uuid },
    Log { entry: ActionLogEntry },
    /// Opaque payload for a named extension channel.
    Custom { channel_id: String, payload: String },
}

impl Message {
    pub fn message_type(&self) -> &'static str {
        match self {
            Message::Update => UPDATE_TYPE,
            Message::UserUpdate { .. } => USER_UPDATE_TYPE,
            Message::Log { .. } => LOG_TYPE,
            Message::Custom { .. } => CUSTOM_TYPE,
        }
    }

    pub fn to_envelope(&self, id: Uuid) -> Result<RawEnvelope> {
        let content = match self {
            Message::Update => None,
            Message::UserUpdate { user_uuid } => Some(serde_json::to_value(UserUpdateContent {
                user_uuid: *user_uuid,
            })?),
            Message::Log { entry } => Some(serde_json::to_value(entry)?),
            Message::Custom {
                channel_id,
                payload,
            } => Some(serde_json::to_value(CustomContent {
                channel_id: channel_id.clone(),
                payload: payload.clone(),
            })?),
        };
        Ok(RawEnvelope {
            id,
            message_type: self.message_type().to_string(),
            content,
        })
    }

    /// `Ok(None)` for types this process does not know about.
    pub fn from_envelope(envelope: &RawEnvelope) -> Result<Option<Message>> {
        let content = || {
            envelope.content.clone().ok_or_else(|| {
                PermweaveError::Messaging(format!(
                    "message {} of type '{}' has no content",
                    envelope.id, envelope.message_type
                ))
            })
        };

        let message = match envelope.message_type.as_str() {
            UPDATE_TYPE => Message::Update,
            USER_UPDATE_TYPE => {
                let content: UserUpdateContent = serde_json::from_value(content()?)?;
                Message::UserUpdate {
                    user_uuid: content.user_uuid,
                }
            }
            LOG_TYPE => Message::Log {
                entry: serde_json::from_value(content()?)?,
            },
            CUSTOM_TYPE => {
                let content: CustomContent = serde_json::from_value(content()?)?;
                Message::Custom {
                    channel_id: content.channel_id,
                    payload: content.payload,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(message))
    }
}
