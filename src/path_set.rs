use std::collections::BTreeSet;

use serde::Serialize;

use crate::path::NodePath;

/// An ordered set of paths that can answer whether a path is covered by one of
/// its members, and drop whole subtrees at once.
///
/// Because [`NodePath`] orders a node directly before its descendants, all of
/// the descendants of a member sit in one contiguous range of the set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PathSet {
    paths: BTreeSet<NodePath>,
}

impl PathSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: NodePath) -> bool {
        self.paths.insert(path)
    }

    pub fn remove(&mut self, path: &NodePath) -> bool {
        self.paths.remove(path)
    }

    pub fn contains(&self, path: &NodePath) -> bool {
        self.paths.contains(path)
    }

    /// Whether `path` is a member, or a descendant of a member.
    ///
    /// If the root path is a member, every path matches.
    pub fn matches(&self, path: &NodePath) -> bool {
        path.ancestors_or_self()
            .any(|candidate| self.paths.contains(&candidate))
    }

    /// Whether a strict ancestor of `path` is a member.
    pub fn contains_ancestor_of(&self, path: &NodePath) -> bool {
        path.ancestors_or_self()
            .skip(1)
            .any(|candidate| self.paths.contains(&candidate))
    }

    /// Removes every strict descendant of `path`, returning what was removed.
    pub fn remove_descendants(&mut self, path: &NodePath) -> Vec<NodePath> {
        let removed = self.descendants(path).cloned().collect::<Vec<_>>();

        for descendant in &removed {
            self.paths.remove(descendant);
        }

        removed
    }

    /// Iterates the strict descendants of `path` that are members.
    pub fn descendants<'a>(&'a self, path: &'a NodePath) -> impl Iterator<Item = &'a NodePath> {
        self.paths
            .range(path.clone()..)
            .take_while(move |candidate| candidate.starts_with(path))
            .filter(move |candidate| *candidate != path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodePath> {
        self.paths.iter()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn clear(&mut self) {
        self.paths.clear();
    }
}

impl FromIterator<NodePath> for PathSet {
    fn from_iter<I: IntoIterator<Item = NodePath>>(iter: I) -> Self {
        Self {
            paths: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a PathSet {
    type Item = &'a NodePath;
    type IntoIter = std::collections::btree_set::Iter<'a, NodePath>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.iter()
    }
}
