use super::{PermissionProcessor, SourceMap};
use crate::calculator::result::TristateResult;
use crate::node::key::ROOT_WILDCARDS;

use std::sync::Arc;

/// Resolves `a.b.c` against `a.b.*`, then `a.*`, then the root wildcards.
pub struct WildcardProcessor {
    source: Arc<SourceMap>,
}

impl WildcardProcessor {
    pub fn new(source: Arc<SourceMap>) -> Self {
        Self { source }
    }
}

impl PermissionProcessor for WildcardProcessor {
    fn name(&self) -> &'static str {
        "wildcard"
    }

    fn has_permission(&self, permission: &str) -> TristateResult {
        let mut prefix = permission;
        while let Some(end) = prefix.rfind('.') {
            prefix = &prefix[..end];
            if prefix.is_empty() {
                break;
            }
            if let Some(entry) = self.source.get(&format!("{}.*", prefix)) {
                return entry.to_result(self.name());
            }
        }

        ROOT_WILDCARDS
            .iter()
            .find_map(|root| self.source.get(root))
            .map(|entry| entry.to_result(self.name()))
            .unwrap_or_default()
    }

    fn is_wildcard(&self) -> bool {
        true
    }
}
