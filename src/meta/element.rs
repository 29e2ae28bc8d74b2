//! Meta stack elements.
//!
//! An element picks one prefix or suffix out of everything a holder has.
//! Entries are offered in precedence order and the element decides, entry
//! by entry, whether the candidate replaces its current pick.

use crate::holder::TrackLookup;
use crate::inheritance::ResolvedNode;
use crate::node::{ChatMetaType, Node, NodeType};
use crate::types::HolderId;

use std::fmt;
use std::sync::Arc;

/// A prefix or suffix together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMetaEntry {
    pub meta_type: ChatMetaType,
    pub priority: i32,
    pub value: String,
    pub node: Node,
    pub origin: HolderId,
}

impl ChatMetaEntry {
    /// `None` unless the node is a granting prefix or suffix node.
    pub fn from_resolved(resolved: &ResolvedNode) -> Option<Self> {
        if !resolved.node.value() {
            return None;
        }
        match resolved.node.node_type() {
            NodeType::ChatMeta {
                meta_type,
                priority,
                value,
            } => Some(Self {
                meta_type,
                priority,
                value,
                node: resolved.node.clone(),
                origin: resolved.origin.clone(),
            }),
            _ => None,
        }
    }
}

pub trait MetaStackElement: Send + Sync + fmt::Debug {
    /// Whether `entry` should become the pick, given the current one.
    fn should_accumulate(
        &self,
        meta_type: ChatMetaType,
        entry: &ChatMetaEntry,
        current: Option<&ChatMetaEntry>,
    ) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityRule {
    Highest,
    Lowest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementFilter {
    Any,
    /// Set directly on a user.
    Own,
    /// Inherited from a group.
    Inherited,
    OnTrack(String),
    NotOnTrack(String),
    FromGroup(String),
    NotFromGroup(String),
}

/// The built-in `highest*` / `lowest*` elements.
pub struct StandardElement {
    rule: PriorityRule,
    filter: ElementFilter,
    tracks: Option<Arc<dyn TrackLookup>>,
}

impl StandardElement {
    pub fn new(rule: PriorityRule, filter: ElementFilter, tracks: Option<Arc<dyn TrackLookup>>) -> Self {
        Self { rule, filter, tracks }
    }

    /// Parses names such as `highest`, `lowest_own` or
    /// `highest_on_track_staff`. Returns `None` for anything else.
    pub fn parse(definition: &str, tracks: Option<Arc<dyn TrackLookup>>) -> Option<Self> {
        let definition = definition.trim().to_lowercase();
        let (rule, rest) = if let Some(rest) = definition.strip_prefix("highest") {
            (PriorityRule::Highest, rest)
        } else if let Some(rest) = definition.strip_prefix("lowest") {
            (PriorityRule::Lowest, rest)
        } else {
            return None;
        };

        let filter = if rest.is_empty() {
            ElementFilter::Any
        } else if rest == "_own" {
            ElementFilter::Own
        } else if rest == "_inherited" {
            ElementFilter::Inherited
        } else if let Some(track) = non_empty(rest.strip_prefix("_on_track_")) {
            ElementFilter::OnTrack(track)
        } else if let Some(track) = non_empty(rest.strip_prefix("_not_on_track_")) {
            ElementFilter::NotOnTrack(track)
        } else if let Some(group) = non_empty(rest.strip_prefix("_from_group_")) {
            ElementFilter::FromGroup(group)
        } else if let Some(group) = non_empty(rest.strip_prefix("_not_from_group_")) {
            ElementFilter::NotFromGroup(group)
        } else {
            return None;
        };

        Some(Self::new(rule, filter, tracks))
    }

    fn on_track(&self, track: &str, origin: &HolderId) -> bool {
        if !origin.is_group() {
            return false;
        }
        self.tracks
            .as_ref()
            .and_then(|tracks| tracks.track(track))
            .map(|t| t.contains(&origin.name))
            .unwrap_or(false)
    }

    fn passes_filter(&self, entry: &ChatMetaEntry) -> bool {
        let origin = &entry.origin;
        match &self.filter {
            ElementFilter::Any => true,
            ElementFilter::Own => origin.is_user(),
            ElementFilter::Inherited => origin.is_group(),
            ElementFilter::OnTrack(track) => self.on_track(track, origin),
            ElementFilter::NotOnTrack(track) => origin.is_group() && !self.on_track(track, origin),
            ElementFilter::FromGroup(group) => origin.is_group() && &origin.name == group,
            ElementFilter::NotFromGroup(group) => origin.is_group() && &origin.name != group,
        }
    }
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.filter(|s| !s.is_empty()).map(str::to_string)
}

impl fmt::Debug for StandardElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandardElement")
            .field("rule", &self.rule)
            .field("filter", &self.filter)
            .finish()
    }
}

impl MetaStackElement for StandardElement {
    fn should_accumulate(
        &self,
        meta_type: ChatMetaType,
        entry: &ChatMetaEntry,
        current: Option<&ChatMetaEntry>,
    ) -> bool {
        if entry.meta_type != meta_type || !self.passes_filter(entry) {
            return false;
        }
        match current {
            None => true,
            Some(current) => match self.rule {
                PriorityRule::Highest => entry.priority > current.priority,
                PriorityRule::Lowest => entry.priority < current.priority,
            },
        }
    }
}
