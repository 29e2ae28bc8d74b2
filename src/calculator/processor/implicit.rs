use super::{PermissionProcessor, SourceMap};
use crate::calculator::result::TristateResult;

use std::sync::Arc;

/// Treats a plain node `a.b` as also covering `a.b.<anything>`.
pub struct ImplicitWildcardProcessor {
    source: Arc<SourceMap>,
}

impl ImplicitWildcardProcessor {
    pub fn new(source: Arc<SourceMap>) -> Self {
        Self { source }
    }
}

impl PermissionProcessor for ImplicitWildcardProcessor {
    fn name(&self) -> &'static str {
        "implicit_wildcard"
    }

    fn has_permission(&self, permission: &str) -> TristateResult {
        let mut prefix = permission;
        while let Some(end) = prefix.rfind('.') {
            prefix = &prefix[..end];
            if prefix.is_empty() {
                break;
            }
            if let Some(entry) = self.source.get(prefix) {
                if !entry.node.is_wildcard() {
                    return entry.to_result(self.name());
                }
            }
        }
        TristateResult::undefined()
    }

    fn is_wildcard(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::source;
    use super::*;
    use crate::calculator::Tristate;

    #[test]
    fn test_parent_node_implies_children() {
        let processor = ImplicitWildcardProcessor::new(source(&[("one", true), ("one.two", false)]));
        assert_eq!(processor.has_permission("one.test").result(), Tristate::True);
        assert_eq!(processor.has_permission("one.two.three").result(), Tristate::False);
        assert_eq!(processor.has_permission("one").result(), Tristate::Undefined);
        assert_eq!(processor.has_permission("other.test").result(), Tristate::Undefined);
    }
}
