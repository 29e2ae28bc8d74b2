use crate::types::{GroupName, TrackName};

use serde::{Deserialize, Serialize};

/// A named, ordered list of groups, e.g. a promotion ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    name: TrackName,
    groups: Vec<GroupName>,
}

impl Track {
    pub fn new(name: &str, groups: Vec<GroupName>) -> Self {
        let mut normalized: Vec<GroupName> = Vec::with_capacity(groups.len());
        for group in groups {
            let group = group.trim().to_lowercase();
            if !group.is_empty() && !normalized.contains(&group) {
                normalized.push(group);
            }
        }
        Self {
            name: name.trim().to_lowercase(),
            groups: normalized,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn groups(&self) -> &[GroupName] {
        &self.groups
    }

    pub fn contains(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g.eq_ignore_ascii_case(group))
    }

    fn position(&self, group: &str) -> Option<usize> {
        self.groups.iter().position(|g| g.eq_ignore_ascii_case(group))
    }

    /// The group after `group`, if any.
    pub fn next(&self, group: &str) -> Option<&str> {
        let index = self.position(group)?;
        self.groups.get(index + 1).map(String::as_str)
    }

    pub fn previous(&self, group: &str) -> Option<&str> {
        let index = self.position(group)?;
        index
            .checked_sub(1)
            .and_then(|i| self.groups.get(i))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder() -> Track {
        Track::new(
            "Staff",
            vec!["Helper".into(), "mod".into(), "admin".into(), "mod".into()],
        )
    }

    #[test]
    fn test_normalization() {
        let track = ladder();
        assert_eq!(track.name(), "staff");
        assert_eq!(track.groups(), &["helper", "mod", "admin"]);
    }

    #[test]
    fn test_navigation() {
        let track = ladder();
        assert!(track.contains("MOD"));
        assert_eq!(track.next("helper"), Some("mod"));
        assert_eq!(track.next("admin"), None);
        assert_eq!(track.previous("helper"), None);
        assert_eq!(track.previous("admin"), Some("mod"));
        assert_eq!(track.next("nobody"), None);
    }
}
