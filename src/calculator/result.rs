use crate::node::Node;
use crate::types::HolderId;

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tristate {
    True,
    False,
    Undefined,
}

impl Tristate {
    pub fn from_bool(value: bool) -> Self {
        if value {
            Tristate::True
        } else {
            Tristate::False
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Tristate::True => Some(true),
            Tristate::False => Some(false),
            Tristate::Undefined => None,
        }
    }

    /// `true` only for an explicit grant.
    pub fn as_bool_or_false(&self) -> bool {
        matches!(self, Tristate::True)
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, Tristate::Undefined)
    }
}

impl fmt::Display for Tristate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tristate::True => f.write_str("true"),
            Tristate::False => f.write_str("false"),
            Tristate::Undefined => f.write_str("undefined"),
        }
    }
}

/// The answer to one check plus what decided it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TristateResult {
    result: Tristate,
    node: Option<Node>,
    origin: Option<HolderId>,
    processor: Option<&'static str>,
    overridden: Option<Box<TristateResult>>,
}

impl TristateResult {
    pub fn undefined() -> Self {
        Self {
            result: Tristate::Undefined,
            node: None,
            origin: None,
            processor: None,
            overridden: None,
        }
    }

    pub fn of(result: Tristate, node: Option<Node>, origin: Option<HolderId>, processor: &'static str) -> Self {
        Self {
            result,
            node,
            origin,
            processor: Some(processor),
            overridden: None,
        }
    }

    pub fn result(&self) -> Tristate {
        self.result
    }

    pub fn node(&self) -> Option<&Node> {
        self.node.as_ref()
    }

    pub fn origin(&self) -> Option<&HolderId> {
        self.origin.as_ref()
    }

    pub fn processor(&self) -> Option<&'static str> {
        self.processor
    }

    /// The wildcard result this one replaced, if an override processor
    /// stepped in.
    pub fn overridden(&self) -> Option<&TristateResult> {
        self.overridden.as_deref()
    }

    pub fn with_overridden(mut self, previous: TristateResult) -> Self {
        self.overridden = Some(Box::new(previous));
        self
    }
}

impl Default for TristateResult {
    fn default() -> Self {
        Self::undefined()
    }
}
