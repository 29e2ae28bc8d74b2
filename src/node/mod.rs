pub mod key;
pub mod ordering;

pub use key::{escape, unescape, wildcard_level, ChatMetaType, NodeType};
pub use ordering::{compare_nodes, compare_with_contexts};

use crate::context::ContextSet;
use crate::error::{PermweaveError, Result};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single scoped fact: a permission grant or deny, a meta value, a
/// prefix/suffix or an inheritance edge.
///
/// Two nodes are the same node when key, value, contexts and expiry are all
/// equal. Nodes are immutable; build them through [`NodeBuilder`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    key: String,
    value: bool,
    #[serde(default)]
    contexts: ContextSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiry: Option<DateTime<Utc>>,
}

impl Node {
    pub fn builder(key: impl Into<String>) -> NodeBuilder {
        NodeBuilder::new(key)
    }

    pub fn permission(key: &str, value: bool) -> Result<Node> {
        Node::builder(key).value(value).build()
    }

    pub fn inheritance(group: &str) -> Result<Node> {
        Node::builder(format!("{}{}", key::INHERITANCE_MARKER, group)).build()
    }

    pub fn meta(meta_key: &str, meta_value: &str) -> Result<Node> {
        Node::builder(format!(
            "{}{}.{}",
            key::META_MARKER,
            escape(meta_key),
            escape(meta_value)
        ))
        .build()
    }

    pub fn chat_meta(meta_type: ChatMetaType, priority: i32, value: &str) -> Result<Node> {
        Node::builder(format!("{}{}.{}", meta_type.marker(), priority, escape(value))).build()
    }

    pub fn prefix(priority: i32, value: &str) -> Result<Node> {
        Node::chat_meta(ChatMetaType::Prefix, priority, value)
    }

    pub fn suffix(priority: i32, value: &str) -> Result<Node> {
        Node::chat_meta(ChatMetaType::Suffix, priority, value)
    }

    pub fn weight(weight: i32) -> Result<Node> {
        Node::builder(format!("{}{}", key::WEIGHT_MARKER, weight)).build()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> bool {
        self.value
    }

    pub fn contexts(&self) -> &ContextSet {
        &self.contexts
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    pub fn is_temporary(&self) -> bool {
        self.expiry.is_some()
    }

    /// Whether the node is inactive at `now`. A node expiring exactly at
    /// `now` has expired.
    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiry, Some(expiry) if expiry <= now)
    }

    pub fn node_type(&self) -> NodeType {
        NodeType::classify(&self.key)
    }

    pub fn wildcard_level(&self) -> Option<usize> {
        wildcard_level(&self.key)
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard_level().is_some()
    }

    /// The group this node makes its holder inherit, if it is a granting
    /// inheritance node.
    pub fn inherited_group(&self) -> Option<String> {
        if !self.value {
            return None;
        }
        match self.node_type() {
            NodeType::Inheritance { group } => Some(group),
            _ => None,
        }
    }

    /// Copy of this node with a different value.
    pub fn with_value(&self, value: bool) -> Node {
        Node {
            value,
            ..self.clone()
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)?;
        if !self.contexts.is_empty() {
            write!(f, " {}", self.contexts)?;
        }
        if let Some(expiry) = self.expiry {
            write!(f, " (expires {})", expiry.to_rfc3339())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NodeBuilder {
    key: String,
    value: bool,
    pairs: Vec<(String, String)>,
    contexts: ContextSet,
    expiry: Option<DateTime<Utc>>,
}

impl NodeBuilder {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: true,
            pairs: Vec::new(),
            contexts: ContextSet::empty(),
            expiry: None,
        }
    }

    pub fn value(mut self, value: bool) -> Self {
        self.value = value;
        self
    }

    pub fn context(mut self, key: &str, value: &str) -> Self {
        self.pairs.push((key.to_string(), value.to_string()));
        self
    }

    pub fn contexts(mut self, contexts: &ContextSet) -> Self {
        self.contexts = self.contexts.merge(contexts);
        self
    }

    pub fn expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn expiry_after(self, duration: chrono::Duration) -> Self {
        self.expiry(Utc::now() + duration)
    }

    pub fn build(self) -> Result<Node> {
        if self.key.trim().is_empty() {
            return Err(PermweaveError::InvalidNode("node key cannot be empty".to_string()));
        }

        // chat meta values may legitimately end in whitespace
        let raw = self.key.trim_start();
        let key = match NodeType::classify(raw) {
            NodeType::Permission => {
                let raw = raw.trim();
                if raw.chars().any(char::is_whitespace) {
                    return Err(PermweaveError::InvalidNode(format!(
                        "permission '{}' cannot contain whitespace",
                        raw
                    )));
                }
                raw.to_lowercase()
            }
            other => other.canonical_key(raw),
        };

        let mut contexts = self.contexts;
        for (k, v) in &self.pairs {
            contexts = contexts.with(k, v)?;
        }

        Ok(Node {
            key,
            value: self.value,
            contexts,
            expiry: self.expiry,
        })
    }
}
