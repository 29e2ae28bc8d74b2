use super::{PermissionProcessor, SourceMap};
use crate::calculator::result::TristateResult;

use std::sync::Arc;

/// Exact key lookup.
pub struct DirectProcessor {
    source: Arc<SourceMap>,
}

impl DirectProcessor {
    pub fn new(source: Arc<SourceMap>) -> Self {
        Self { source }
    }
}

impl PermissionProcessor for DirectProcessor {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn has_permission(&self, permission: &str) -> TristateResult {
        match self.source.get(permission) {
            Some(entry) => entry.to_result(self.name()),
            None => TristateResult::undefined(),
        }
    }
}
