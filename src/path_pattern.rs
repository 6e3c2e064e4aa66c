//! Wildcard patterns over tree paths.
//!
//! `**` matches any run of characters, including `/`. `*` matches any run of
//! characters that does not contain `/`. Everything else matches literally.
//! Each pattern keeps its source text next to its compiled matcher so it can
//! round-trip through configuration files.

use regex::Regex;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use crate::{error::ConfigError, path::NodePath};

#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    matcher: Regex,
}

impl PathPattern {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidPattern {
            pattern: pattern.to_owned(),
            reason: reason.to_owned(),
        };

        if !pattern.starts_with('/') {
            return Err(invalid("patterns must be absolute"));
        }

        if pattern.contains("***") {
            return Err(invalid("'***' is not a valid wildcard"));
        }

        let matcher = Regex::new(&translate(pattern)).map_err(|err| invalid(&err.to_string()))?;

        Ok(Self {
            source: pattern.to_owned(),
            matcher,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, path: &NodePath) -> bool {
        self.is_match_str(&path.to_string())
    }

    pub fn is_match_str(&self, path: &str) -> bool {
        self.matcher.is_match(path)
    }

    pub fn wildcard_count(&self) -> usize {
        self.matcher.captures_len() - 1
    }

    /// The text matched by each wildcard, in order, if `path` matches.
    pub fn captures(&self, path: &str) -> Option<Vec<String>> {
        let captures = self.matcher.captures(path)?;

        Some(
            captures
                .iter()
                .skip(1)
                .map(|capture| capture.map(|m| m.as_str().to_owned()).unwrap_or_default())
                .collect(),
        )
    }
}

/// Turns a wildcard pattern into an anchored regular expression with one
/// capture group per wildcard. A `*` that makes up a whole segment must match
/// at least one character, since segments are never empty.
fn translate(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();

    let mut expression = String::with_capacity(pattern.len() * 2);
    expression.push('^');

    let mut index = 0;
    while index < chars.len() {
        let c = chars[index];

        if c == '*' {
            if chars.get(index + 1) == Some(&'*') {
                expression.push_str("(.*)");
                index += 2;
                continue;
            }

            let whole_segment = index > 0
                && chars[index - 1] == '/'
                && chars.get(index + 1).map_or(true, |next| *next == '/');

            if whole_segment {
                expression.push_str("([^/]+)");
            } else {
                expression.push_str("([^/]*)");
            }
        } else {
            let mut buffer = [0; 4];
            expression.push_str(&regex::escape(c.encode_utf8(&mut buffer)));
        }

        index += 1;
    }

    expression.push('$');
    expression
}

impl PartialEq for PathPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for PathPattern {}

impl Serialize for PathPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for PathPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pattern = String::deserialize(deserializer)?;

        PathPattern::new(&pattern).map_err(D::Error::custom)
    }
}

/// An ordered collection of patterns answering "does anything match".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternSet {
    patterns: Vec<PathPattern>,
}

impl PatternSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_patterns<I, S>(patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| PathPattern::new(pattern.as_ref()))
            .collect::<Result<_, _>>()?;

        Ok(Self { patterns })
    }

    pub fn push(&mut self, pattern: PathPattern) {
        self.patterns.push(pattern);
    }

    pub fn extend(&mut self, other: &PatternSet) {
        self.patterns.extend(other.patterns.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathPattern> {
        self.patterns.iter()
    }

    /// Whether any pattern matches `path` itself.
    pub fn matches(&self, path: &NodePath) -> bool {
        let path = path.to_string();
        self.patterns.iter().any(|pattern| pattern.is_match_str(&path))
    }

    /// Whether any pattern matches `path` or one of its ancestors.
    pub fn matches_self_or_ancestor(&self, path: &NodePath) -> bool {
        if self.patterns.is_empty() {
            return false;
        }

        path.ancestors_or_self().any(|candidate| self.matches(&candidate))
    }
}
