use std::{
    collections::BTreeSet,
    time::{Duration, Instant},
};

use crate::{category::Category, path::NodePath, path_set::PathSet};

/// The added, changed and deleted paths of one category.
///
/// The sets never overlap: an added or deleted subtree hides everything
/// recorded below it, and a change below an added or deleted path is not
/// recorded at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryChanges {
    added: PathSet,
    changed: PathSet,
    deleted: PathSet,
}

impl CategoryChanges {
    pub fn added(&self) -> &PathSet {
        &self.added
    }

    pub fn changed(&self) -> &PathSet {
        &self.changed
    }

    pub fn deleted(&self) -> &PathSet {
        &self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.deleted.is_empty()
    }

    pub fn add_added(&mut self, path: NodePath) {
        if self.added.matches(&path) {
            return;
        }

        self.added.remove_descendants(&path);
        self.changed.remove_descendants(&path);
        self.deleted.remove_descendants(&path);

        self.changed.remove(&path);
        self.deleted.remove(&path);
        self.added.add(path);
    }

    pub fn add_changed(&mut self, path: NodePath) {
        if self.added.matches(&path) || self.deleted.matches(&path) || self.changed.matches(&path)
        {
            return;
        }

        self.changed.remove_descendants(&path);
        self.changed.add(path);
    }

    pub fn add_deleted(&mut self, path: NodePath) {
        // Anything below an added path is exported with it, deleted or not.
        if self.added.contains_ancestor_of(&path) || self.deleted.matches(&path) {
            return;
        }

        self.added.remove_descendants(&path);
        self.changed.remove_descendants(&path);
        self.deleted.remove_descendants(&path);

        self.added.remove(&path);
        self.changed.remove(&path);
        self.deleted.add(path);
    }

    /// Whether `path` is covered by any of the three sets.
    pub fn covers(&self, path: &NodePath) -> bool {
        self.added.matches(path) || self.changed.matches(path) || self.deleted.matches(path)
    }
}

/// Everything collected since the last successful export.
#[derive(Debug, Clone)]
pub struct ChangeBatch {
    pub config: CategoryChanges,
    pub content: CategoryChanges,

    /// Prefixes of namespaces whose node types changed.
    pub namespaces: BTreeSet<String>,

    created_at: Instant,
}

impl ChangeBatch {
    pub fn new(created_at: Instant) -> Self {
        Self {
            config: CategoryChanges::default(),
            content: CategoryChanges::default(),
            namespaces: BTreeSet::new(),
            created_at,
        }
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    pub fn is_empty(&self) -> bool {
        self.config.is_empty() && self.content.is_empty() && self.namespaces.is_empty()
    }

    /// The changes of a category that gets exported.
    pub fn changes_mut(&mut self, category: Category) -> Option<&mut CategoryChanges> {
        match category {
            Category::Config => Some(&mut self.config),
            Category::Content => Some(&mut self.content),
            Category::System => None,
        }
    }
}
