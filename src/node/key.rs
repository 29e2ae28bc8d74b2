//! Key shapes and delimiter escaping.
//!
//! A node's kind is always derived from its key; nothing else is stored.

use serde::{Deserialize, Serialize};

pub const INHERITANCE_MARKER: &str = "group.";
pub const META_MARKER: &str = "meta.";
pub const PREFIX_MARKER: &str = "prefix.";
pub const SUFFIX_MARKER: &str = "suffix.";
pub const WEIGHT_MARKER: &str = "weight.";
pub const DISPLAY_NAME_MARKER: &str = "displayname.";
pub const REGEX_MARKERS: [&str; 2] = ["r=", "R="];

/// Global wildcard spellings, checked after every prefix wildcard.
pub const ROOT_WILDCARDS: [&str; 2] = ["*", "'*'"];

const DELIMITER: char = '.';
const ESCAPE: char = '\\';

/// Prefix or suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMetaType {
    Prefix,
    Suffix,
}

impl ChatMetaType {
    pub fn marker(&self) -> &'static str {
        match self {
            ChatMetaType::Prefix => PREFIX_MARKER,
            ChatMetaType::Suffix => SUFFIX_MARKER,
        }
    }
}

impl std::fmt::Display for ChatMetaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatMetaType::Prefix => f.write_str("prefix"),
            ChatMetaType::Suffix => f.write_str("suffix"),
        }
    }
}

/// Classification of a node key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeType {
    Permission,
    Regex { pattern: String },
    Inheritance { group: String },
    Meta { key: String, value: String },
    ChatMeta { meta_type: ChatMetaType, priority: i32, value: String },
    Weight { weight: i32 },
    DisplayName { name: String },
}

impl NodeType {
    pub fn classify(key: &str) -> NodeType {
        for marker in REGEX_MARKERS {
            if let Some(pattern) = key.strip_prefix(marker) {
                if !pattern.is_empty() {
                    return NodeType::Regex {
                        pattern: pattern.to_string(),
                    };
                }
            }
        }

        if let Some(group) = strip_marker(key, INHERITANCE_MARKER) {
            let group = group.trim();
            if !group.is_empty() {
                return NodeType::Inheritance {
                    group: group.to_lowercase(),
                };
            }
        }

        if let Some(rest) = strip_marker(key, META_MARKER) {
            if let Some((k, v)) = split_unescaped(rest) {
                if !k.is_empty() {
                    return NodeType::Meta {
                        key: unescape(k),
                        value: unescape(v),
                    };
                }
            }
        }

        for meta_type in [ChatMetaType::Prefix, ChatMetaType::Suffix] {
            if let Some(rest) = strip_marker(key, meta_type.marker()) {
                if let Some((priority, value)) = split_unescaped(rest) {
                    if let Ok(priority) = priority.parse::<i32>() {
                        return NodeType::ChatMeta {
                            meta_type,
                            priority,
                            value: unescape(value),
                        };
                    }
                }
            }
        }

        if let Some(rest) = strip_marker(key, WEIGHT_MARKER) {
            if let Ok(weight) = rest.parse::<i32>() {
                return NodeType::Weight { weight };
            }
        }

        if let Some(rest) = strip_marker(key, DISPLAY_NAME_MARKER) {
            if !rest.is_empty() {
                return NodeType::DisplayName {
                    name: rest.to_string(),
                };
            }
        }

        NodeType::Permission
    }

    /// Canonical key for this classification. Plain permission keys have no
    /// canonical form beyond lower-casing, so `raw` is used for them.
    pub fn canonical_key(&self, raw: &str) -> String {
        match self {
            NodeType::Permission => raw.to_lowercase(),
            NodeType::Regex { pattern } => format!("r={}", pattern),
            NodeType::Inheritance { group } => format!("{}{}", INHERITANCE_MARKER, group),
            NodeType::Meta { key, value } => {
                format!("{}{}.{}", META_MARKER, escape(key), escape(value))
            }
            NodeType::ChatMeta {
                meta_type,
                priority,
                value,
            } => format!("{}{}.{}", meta_type.marker(), priority, escape(value)),
            NodeType::Weight { weight } => format!("{}{}", WEIGHT_MARKER, weight),
            NodeType::DisplayName { name } => format!("{}{}", DISPLAY_NAME_MARKER, name),
        }
    }
}

fn strip_marker<'a>(key: &'a str, marker: &str) -> Option<&'a str> {
    let head = key.get(..marker.len())?;
    if head.eq_ignore_ascii_case(marker) {
        Some(&key[marker.len()..])
    } else {
        None
    }
}

/// Escapes the delimiter and the escape character itself.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == DELIMITER || c == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == ESCAPE {
            match chars.next() {
                Some(next) => out.push(next),
                None => out.push(ESCAPE),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Splits on the first delimiter not preceded by an escape. Both halves are
/// returned still escaped.
pub fn split_unescaped(s: &str) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if c == ESCAPE {
            escaped = true;
        } else if c == DELIMITER {
            return Some((&s[..i], &s[i + 1..]));
        }
    }
    None
}

/// Number of separators in a wildcard key, `None` for anything else.
pub fn wildcard_level(key: &str) -> Option<usize> {
    if ROOT_WILDCARDS.contains(&key) {
        return Some(0);
    }
    if key.ends_with(".*") {
        return Some(key.matches(DELIMITER).count());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_inheritance() {
        assert_eq!(
            NodeType::classify("Group.Admin"),
            NodeType::Inheritance {
                group: "admin".to_string()
            }
        );
        assert_eq!(NodeType::classify("group."), NodeType::Permission);
    }

    #[test]
    fn test_classify_meta_with_escapes() {
        assert_eq!(
            NodeType::classify(r"meta.home\.x.1\.5"),
            NodeType::Meta {
                key: "home.x".to_string(),
                value: "1.5".to_string()
            }
        );
        assert_eq!(NodeType::classify("meta.novalue"), NodeType::Permission);
    }

    #[test]
    fn test_classify_chat_meta() {
        assert_eq!(
            NodeType::classify("prefix.10.[Admin] "),
            NodeType::ChatMeta {
                meta_type: ChatMetaType::Prefix,
                priority: 10,
                value: "[Admin] ".to_string()
            }
        );
        assert_eq!(
            NodeType::classify("suffix.-5.a.b"),
            NodeType::ChatMeta {
                meta_type: ChatMetaType::Suffix,
                priority: -5,
                value: "a.b".to_string()
            }
        );
        assert_eq!(NodeType::classify("prefix.high.x"), NodeType::Permission);
    }

    #[test]
    fn test_classify_misc() {
        assert_eq!(NodeType::classify("weight.100"), NodeType::Weight { weight: 100 });
        assert_eq!(
            NodeType::classify(r"r=hello\d+"),
            NodeType::Regex {
                pattern: r"hello\d+".to_string()
            }
        );
        assert_eq!(
            NodeType::classify("R=abc"),
            NodeType::Regex {
                pattern: "abc".to_string()
            }
        );
        assert_eq!(NodeType::classify("some.permission"), NodeType::Permission);
    }

    #[test]
    fn test_escape_unescape() {
        let raw = r"a.b\c";
        let escaped = escape(raw);
        assert_eq!(escaped, r"a\.b\\c");
        assert_eq!(unescape(&escaped), raw);
        assert_eq!(split_unescaped(r"a\.b.c.d"), Some((r"a\.b", "c.d")));
        assert_eq!(split_unescaped(r"a\.b"), None);
    }

    #[test]
    fn test_wildcard_level() {
        assert_eq!(wildcard_level("*"), Some(0));
        assert_eq!(wildcard_level("'*'"), Some(0));
        assert_eq!(wildcard_level("one.*"), Some(1));
        assert_eq!(wildcard_level("one.two.three.*"), Some(3));
        assert_eq!(wildcard_level("one.two"), None);
    }
}
