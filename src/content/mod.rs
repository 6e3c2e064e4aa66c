//! The narrow view of the content store that exporting needs: reading the live
//! tree, and reading the journal of changes made to it.

mod memory;

use std::collections::BTreeMap;

use crate::{
    error::StoreError,
    model::PropertyValue,
    path::{NodePath, Segment},
};

pub use memory::{MemoryContentTree, MemoryJournal};

/// A live node as the store reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentNode {
    pub primary_type: String,
    pub mixin_types: Vec<String>,

    /// Whether the node's type keeps its children in a meaningful order.
    pub orderable_children: bool,

    pub children: Vec<Segment>,

    /// Every property except the primary type and mixin types.
    pub properties: BTreeMap<String, PropertyValue>,
}

impl ContentNode {
    pub fn new(primary_type: impl Into<String>) -> Self {
        Self {
            primary_type: primary_type.into(),
            mixin_types: Vec::new(),
            orderable_children: true,
            children: Vec::new(),
            properties: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceInfo {
    pub uri: String,

    /// The compact type definitions registered under the prefix.
    pub cnd: Option<String>,
}

pub trait ContentTree {
    fn node_exists(&self, path: &NodePath) -> Result<bool, StoreError>;

    fn get_node(&self, path: &NodePath) -> Result<Option<ContentNode>, StoreError>;

    fn get_property(&self, path: &NodePath) -> Result<Option<PropertyValue>, StoreError>;

    fn namespace(&self, prefix: &str) -> Result<Option<NamespaceInfo>, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    NodeAdd,
    NodeDelete,
    NodeMove,
    PropAdd,
    PropChange,
    PropDelete,
}

impl EventType {
    pub fn is_property(self) -> bool {
        matches!(
            self,
            EventType::PropAdd | EventType::PropChange | EventType::PropDelete
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub revision: u64,
    pub path: NodePath,
    pub event_type: EventType,
    pub user_data: Option<String>,
}

/// The ordered stream of changes to the store.
pub trait EventJournal {
    /// Returns up to `limit` events with a revision greater than
    /// `after_revision`, oldest first.
    fn read_events(&self, after_revision: u64, limit: usize)
        -> Result<Vec<ChangeEvent>, StoreError>;
}
