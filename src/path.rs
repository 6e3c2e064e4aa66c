//! Absolute paths into the content tree.
//!
//! A path is a list of named segments, each carrying a same-name-sibling
//! index. Index 1 is the default and is never printed, so `/a/b[1]` and
//! `/a/b` are the same path.

use std::{fmt, str::FromStr};

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path '{path}' is not absolute")]
    NotAbsolute { path: String },

    #[error("path '{path}' contains an empty segment")]
    EmptySegment { path: String },

    #[error("path segment '{segment}' has a malformed same-name-sibling index")]
    BadIndex { segment: String },
}

/// One named step of a [`NodePath`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Segment {
    name: String,
    index: u32,
}

impl Segment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: 1,
        }
    }

    pub fn with_index(name: impl Into<String>, index: u32) -> Self {
        Self {
            name: name.into(),
            index: index.max(1),
        }
    }

    pub fn parse(source: &str) -> Result<Self, PathError> {
        if source.is_empty() {
            return Err(PathError::EmptySegment {
                path: source.to_owned(),
            });
        }

        let Some(open) = source.find('[') else {
            return Ok(Segment::new(source));
        };

        let bad_index = || PathError::BadIndex {
            segment: source.to_owned(),
        };

        let (name, rest) = source.split_at(open);
        let digits = rest
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(bad_index)?;
        let index: u32 = digits.parse().map_err(|_| bad_index())?;

        if name.is_empty() || index == 0 {
            return Err(bad_index());
        }

        Ok(Segment::with_index(name, index))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        if self.index > 1 {
            write!(formatter, "{}[{}]", self.name, self.index)
        } else {
            formatter.write_str(&self.name)
        }
    }
}

/// An absolute path to a node or property in the content tree.
///
/// Paths order segment by segment. This puts every node directly before its
/// descendants, and keeps all descendants of a node contiguous, which
/// [`PathSet`](crate::path_set::PathSet) relies on.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodePath {
    segments: Vec<Segment>,
}

impl NodePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(source: &str) -> Result<Self, PathError> {
        let trimmed = source.trim();

        let Some(rest) = trimmed.strip_prefix('/') else {
            return Err(PathError::NotAbsolute {
                path: source.to_owned(),
            });
        };

        // The canonical form has no trailing slash, but we accept one.
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        if rest.is_empty() {
            return Ok(Self::root());
        }

        let mut segments = Vec::new();
        for raw in rest.split('/') {
            if raw.is_empty() {
                return Err(PathError::EmptySegment {
                    path: source.to_owned(),
                });
            }
            segments.push(Segment::parse(raw)?);
        }

        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// The last segment of this path, or `None` for the root.
    pub fn name(&self) -> Option<&Segment> {
        self.segments.last()
    }

    pub fn parent(&self) -> Option<NodePath> {
        if self.is_root() {
            return None;
        }

        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn join(&self, segment: Segment) -> NodePath {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    /// Shorthand for joining a segment with the default index.
    pub fn child(&self, name: &str) -> NodePath {
        self.join(Segment::new(name))
    }

    /// Whether `self` is `other` or one of its descendants.
    pub fn starts_with(&self, other: &NodePath) -> bool {
        self.segments.starts_with(&other.segments)
    }

    /// Whether `self` is a strict descendant of `other`.
    pub fn is_descendant_of(&self, other: &NodePath) -> bool {
        self.depth() > other.depth() && self.starts_with(other)
    }

    /// Iterates this path and then each of its ancestors, ending at the root.
    pub fn ancestors_or_self(&self) -> impl Iterator<Item = NodePath> + '_ {
        (0..=self.segments.len()).rev().map(move |len| NodePath {
            segments: self.segments[..len].to_vec(),
        })
    }

    /// The segments of `self` below `base`, if `self` starts with `base`.
    pub fn relative_to(&self, base: &NodePath) -> Option<&[Segment]> {
        if self.starts_with(base) {
            Some(&self.segments[base.depth()..])
        } else {
            None
        }
    }

    /// The ancestor-or-self of `self` at the given depth.
    pub fn truncate(&self, depth: usize) -> NodePath {
        NodePath {
            segments: self.segments[..depth.min(self.depth())].to_vec(),
        }
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        if self.segments.is_empty() {
            return formatter.write_str("/");
        }

        for segment in &self.segments {
            write!(formatter, "/{}", segment)?;
        }

        Ok(())
    }
}

impl fmt::Debug for NodePath {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "NodePath({})", self)
    }
}

impl FromStr for NodePath {
    type Err = PathError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        NodePath::parse(source)
    }
}

impl Serialize for NodePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;

        NodePath::parse(&source).map_err(D::Error::custom)
    }
}
