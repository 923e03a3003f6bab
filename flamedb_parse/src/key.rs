//! Storage keys: the metric identity that partitions the segment store.
//!
//! A key is written as `name{tag1=val1,tag2=val2}`. Tags are held in sorted
//! order, so two spellings of the same tag set compare equal and produce the
//! same [`StorageKey::canonical_string`].
//!
//! # Example
//!
//! ```
//! use flamedb_parse::StorageKey;
//!
//! let key = StorageKey::parse("app.cpu{region=eu,host=a}").unwrap();
//! assert_eq!(key.canonical_string(), "app.cpu{host=a,region=eu}");
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur while parsing a storage key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed storage key '{input}': {reason}")]
    Malformed { input: String, reason: &'static str },
}

/// Result type for storage key parsing.
pub type Result<T> = std::result::Result<T, ParseError>;

/// A metric name plus its tag set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageKey {
    name: String,
    tags: BTreeMap<String, String>,
}

impl StorageKey {
    /// Create a key with no tags.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
        }
    }

    /// Add (or replace) a tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Parse a key of the form `name{k=v,...}`.
    ///
    /// The braces are optional. Whitespace around names, tag keys and tag
    /// values is ignored, empty entries between commas are skipped, and a
    /// repeated tag key keeps its last value.
    pub fn parse(input: &str) -> Result<Self> {
        let malformed = |reason| ParseError::Malformed {
            input: input.to_string(),
            reason,
        };

        let (name, body) = match input.find('{') {
            None => {
                if input.contains('}') {
                    return Err(malformed("unbalanced braces"));
                }
                (input, None)
            }
            Some(open) => {
                let name = &input[..open];
                let rest = &input[open + 1..];
                let close = rest.find('}').ok_or_else(|| malformed("unbalanced braces"))?;
                let body = &rest[..close];

                if name.contains('}') || body.contains('{') {
                    return Err(malformed("unbalanced braces"));
                }
                if !rest[close + 1..].trim().is_empty() {
                    return Err(malformed("unexpected characters after closing brace"));
                }
                (name, Some(body))
            }
        };

        let name = name.trim();
        if name.is_empty() {
            return Err(malformed("empty name"));
        }

        let mut key = StorageKey::new(name);
        for entry in body.into_iter().flat_map(|b| b.split(',')) {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (tag, value) = entry
                .split_once('=')
                .ok_or_else(|| malformed("tag entry without '='"))?;
            let tag = tag.trim();
            if tag.is_empty() {
                return Err(malformed("empty tag key"));
            }
            key.tags.insert(tag.to_string(), value.trim().to_string());
        }

        Ok(key)
    }

    /// The metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All tags, sorted by tag key.
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Look up a single tag value.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Serialize as `name{k1=v1,k2=v2}` with tags in sorted order.
    pub fn canonical_string(&self) -> String {
        let mut out = String::with_capacity(self.name.len() + 2);
        out.push_str(&self.name);
        out.push('{');
        for (i, (tag, value)) in self.tags.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(tag);
            out.push('=');
            out.push_str(value);
        }
        out.push('}');
        out
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

impl FromStr for StorageKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self> {
        StorageKey::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_name_with_empty_braces() {
        let key = StorageKey::parse("test.app{}").unwrap();

        assert_eq!(key.name(), "test.app");
        assert!(key.tags().is_empty());
        assert_eq!(key.canonical_string(), "test.app{}");
    }

    #[test]
    fn parse_name_without_braces() {
        let key = StorageKey::parse("test.app").unwrap();

        assert_eq!(key, StorageKey::new("test.app"));
        assert_eq!(key.canonical_string(), "test.app{}");
    }

    #[test]
    fn tags_are_sorted_in_canonical_form() {
        let key = StorageKey::parse("app.cpu{region=eu-west,env=prod,host=web-1}").unwrap();

        assert_eq!(key.canonical_string(), "app.cpu{env=prod,host=web-1,region=eu-west}");
        assert_eq!(key.tag("env"), Some("prod"));
        assert_eq!(key.tag("missing"), None);
    }

    #[test]
    fn equivalent_tag_sets_are_equal() {
        let a = StorageKey::parse("app{a=1,b=2}").unwrap();
        let b = StorageKey::parse("app{ b = 2 , a = 1 }").unwrap();

        assert_eq!(a, b);
        assert_eq!(a.canonical_string(), b.canonical_string());
    }

    #[test]
    fn different_tag_values_are_not_equal() {
        let a = StorageKey::parse("app{a=1}").unwrap();
        let b = StorageKey::parse("app{a=2}").unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn builder_matches_parsed_key() {
        let built = StorageKey::new("app").with_tag("host", "a").with_tag("env", "dev");
        let parsed: StorageKey = "app{host=a,env=dev}".parse().unwrap();

        assert_eq!(built, parsed);
        assert_eq!(built.to_string(), "app{env=dev,host=a}");
    }

    #[test]
    fn canonical_string_round_trips() {
        let key = StorageKey::parse("svc{z=last,a=first,m=}").unwrap();
        let reparsed = StorageKey::parse(&key.canonical_string()).unwrap();

        assert_eq!(key, reparsed);
        assert_eq!(reparsed.tag("m"), Some(""));
    }

    #[test]
    fn trailing_comma_is_tolerated() {
        let key = StorageKey::parse("app{a=1,}").unwrap();

        assert_eq!(key.tags().len(), 1);
    }

    #[test]
    fn repeated_tag_keeps_last_value() {
        let key = StorageKey::parse("app{a=1,a=2}").unwrap();

        assert_eq!(key.tag("a"), Some("2"));
    }

    #[test]
    fn unclosed_brace_fails() {
        let result = StorageKey::parse("app{a=1");

        assert!(matches!(
            result,
            Err(ParseError::Malformed { reason: "unbalanced braces", .. })
        ));
    }

    #[test]
    fn stray_closing_brace_fails() {
        assert!(matches!(
            StorageKey::parse("app}"),
            Err(ParseError::Malformed { reason: "unbalanced braces", .. })
        ));
        assert!(matches!(
            StorageKey::parse("app{a={b}}"),
            Err(ParseError::Malformed { reason: "unbalanced braces", .. })
        ));
    }

    #[test]
    fn tag_without_equals_fails() {
        let result = StorageKey::parse("app{host}");

        assert!(matches!(
            result,
            Err(ParseError::Malformed {
                input,
                reason: "tag entry without '='",
            }) if input == "app{host}"
        ));
    }

    #[test]
    fn empty_name_fails() {
        assert!(matches!(
            StorageKey::parse("{a=1}"),
            Err(ParseError::Malformed { reason: "empty name", .. })
        ));
    }

    #[test]
    fn trailing_characters_fail() {
        assert!(matches!(
            StorageKey::parse("app{a=1}x"),
            Err(ParseError::Malformed { .. })
        ));
    }
}
