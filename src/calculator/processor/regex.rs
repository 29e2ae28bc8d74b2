use super::{PermissionProcessor, SourceEntry, SourceMap};
use crate::calculator::result::TristateResult;
use crate::node::NodeType;

use ::regex::Regex;
use tracing::warn;

/// Matches `r=<pattern>` nodes against the whole permission string.
pub struct RegexProcessor {
    patterns: Vec<(Regex, SourceEntry)>,
}

impl RegexProcessor {
    /// Compiles every regex node in `source`. Invalid patterns are logged
    /// and ignored.
    pub fn new(source: &SourceMap) -> Self {
        let patterns = source
            .regex_entries()
            .iter()
            .filter_map(|entry| {
                let NodeType::Regex { pattern } = entry.node.node_type() else {
                    return None;
                };
                match Regex::new(&format!("^(?:{})$", pattern)) {
                    Ok(regex) => Some((regex, entry.clone())),
                    Err(e) => {
                        warn!(pattern = %pattern, origin = %entry.origin, error = %e, "Ignoring invalid regex permission");
                        None
                    }
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl PermissionProcessor for RegexProcessor {
    fn name(&self) -> &'static str {
        "regex"
    }

    fn has_permission(&self, permission: &str) -> TristateResult {
        self.patterns
            .iter()
            .find(|(regex, _)| regex.is_match(permission))
            .map(|(_, entry)| entry.to_result(self.name()))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::source;
    use super::*;
    use crate::calculator::Tristate;

    #[test]
    fn test_regex_matching() {
        let processor = RegexProcessor::new(&source(&[
            (r"r=hello\d+", true),
            (r"R=rege(x(es)?|xps?)[1-5]", false),
        ]));

        assert_eq!(processor.has_permission("hello1").result(), Tristate::True);
        assert_eq!(processor.has_permission("hello123").result(), Tristate::True);
        assert_eq!(processor.has_permission("hello").result(), Tristate::Undefined);
        assert_eq!(processor.has_permission("helloo").result(), Tristate::Undefined);

        for denied in ["regex1", "regexes2", "regexp3", "regexps4"] {
            assert_eq!(processor.has_permission(denied).result(), Tristate::False, "{}", denied);
        }
        assert_eq!(processor.has_permission("regex6").result(), Tristate::Undefined);
    }

    #[test]
    fn test_invalid_pattern_ignored() {
        let processor = RegexProcessor::new(&source(&[("r=(unclosed", true)]));
        assert!(processor.is_empty());
        assert_eq!(processor.has_permission("(unclosed").result(), Tristate::Undefined);
    }
}
