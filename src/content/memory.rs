//! An in-memory content store that records every change it makes in a
//! journal. Handy for tests and for embedding without a real store.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock,
    },
};

use crate::{
    error::StoreError,
    model::{ConfigurationModel, DefinitionNode, PropertyValue, Value, MIXIN_TYPES, PRIMARY_TYPE},
    path::{NodePath, Segment},
};

use super::{ChangeEvent, ContentNode, ContentTree, EventJournal, EventType, NamespaceInfo};

const NODE_TYPES_ROOT: &str = "/jcr:system/jcr:nodeTypes";

const DEFAULT_PRIMARY_TYPE: &str = "nt:unstructured";

#[derive(Debug, Default)]
pub struct MemoryJournal {
    events: Mutex<Vec<ChangeEvent>>,
    failing: AtomicBool,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event and returns the revision it was given.
    pub fn push(&self, path: NodePath, event_type: EventType, user_data: Option<String>) -> u64 {
        let mut events = self.events.lock().unwrap();
        let revision = events.last().map(|event| event.revision + 1).unwrap_or(1);

        events.push(ChangeEvent {
            revision,
            path,
            event_type,
            user_data,
        });

        revision
    }

    pub fn last_revision(&self) -> u64 {
        let events = self.events.lock().unwrap();
        events.last().map(|event| event.revision).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes every read fail until turned off again.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl EventJournal for MemoryJournal {
    fn read_events(
        &self,
        after_revision: u64,
        limit: usize,
    ) -> Result<Vec<ChangeEvent>, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::new("journal is unavailable"));
        }

        let events = self.events.lock().unwrap();

        Ok(events
            .iter()
            .filter(|event| event.revision > after_revision)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[derive(Debug)]
pub struct MemoryContentTree {
    nodes: RwLock<BTreeMap<NodePath, ContentNode>>,
    namespaces: RwLock<BTreeMap<String, NamespaceInfo>>,
    journal: Arc<MemoryJournal>,
    user_data: Mutex<Option<String>>,
    failing: AtomicBool,
}

impl Default for MemoryContentTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryContentTree {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(NodePath::root(), ContentNode::new("rep:root"));

        Self {
            nodes: RwLock::new(nodes),
            namespaces: RwLock::new(BTreeMap::new()),
            journal: Arc::new(MemoryJournal::new()),
            user_data: Mutex::new(None),
            failing: AtomicBool::new(false),
        }
    }

    pub fn journal(&self) -> Arc<MemoryJournal> {
        Arc::clone(&self.journal)
    }

    /// Attaches `user_data` to every event recorded from now on.
    pub fn set_user_data(&self, user_data: Option<&str>) {
        *self.user_data.lock().unwrap() = user_data.map(ToOwned::to_owned);
    }

    /// Makes every read fail until turned off again.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn record(&self, path: NodePath, event_type: EventType) {
        let user_data = self.user_data.lock().unwrap().clone();
        self.journal.push(path, event_type, user_data);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::new("content store is unavailable"))
        } else {
            Ok(())
        }
    }

    pub fn add_node(&self, path: &NodePath, primary_type: &str) -> Result<(), StoreError> {
        let (Some(parent), Some(name)) = (path.parent(), path.name()) else {
            return Err(StoreError::at(path, "the root node already exists"));
        };

        {
            let mut nodes = self.nodes.write().unwrap();

            if nodes.contains_key(path) {
                return Err(StoreError::at(path, "node already exists"));
            }

            let parent_node = nodes
                .get_mut(&parent)
                .ok_or_else(|| StoreError::at(path, "parent node does not exist"))?;
            parent_node.children.push(name.clone());

            nodes.insert(path.clone(), ContentNode::new(primary_type));
        }

        self.record(path.clone(), EventType::NodeAdd);
        Ok(())
    }

    pub fn remove_node(&self, path: &NodePath) -> Result<(), StoreError> {
        let (Some(parent), Some(name)) = (path.parent(), path.name()) else {
            return Err(StoreError::at(path, "the root node cannot be removed"));
        };

        {
            let mut nodes = self.nodes.write().unwrap();

            if !nodes.contains_key(path) {
                return Err(StoreError::at(path, "node does not exist"));
            }

            let removed: Vec<NodePath> = nodes
                .range(path.clone()..)
                .take_while(|(candidate, _)| candidate.starts_with(path))
                .map(|(candidate, _)| candidate.clone())
                .collect();
            for candidate in removed {
                nodes.remove(&candidate);
            }

            if let Some(parent_node) = nodes.get_mut(&parent) {
                parent_node.children.retain(|child| child != name);
            }
        }

        self.record(path.clone(), EventType::NodeDelete);
        Ok(())
    }

    pub fn set_property(
        &self,
        path: &NodePath,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), StoreError> {
        let existed = self.with_node(path, |node| {
            node.properties.insert(name.to_owned(), value).is_some()
        })?;

        let event_type = if existed {
            EventType::PropChange
        } else {
            EventType::PropAdd
        };
        self.record(path.join(Segment::new(name)), event_type);
        Ok(())
    }

    pub fn remove_property(&self, path: &NodePath, name: &str) -> Result<(), StoreError> {
        let existed = self.with_node(path, |node| node.properties.remove(name).is_some())?;

        if !existed {
            return Err(StoreError::at(path, format!("property {} does not exist", name)));
        }

        self.record(path.join(Segment::new(name)), EventType::PropDelete);
        Ok(())
    }

    pub fn set_primary_type(&self, path: &NodePath, primary_type: &str) -> Result<(), StoreError> {
        self.with_node(path, |node| node.primary_type = primary_type.to_owned())?;

        self.record(path.join(Segment::new(PRIMARY_TYPE)), EventType::PropChange);
        Ok(())
    }

    pub fn set_mixin_types(&self, path: &NodePath, mixins: &[&str]) -> Result<(), StoreError> {
        self.with_node(path, |node| {
            node.mixin_types = mixins.iter().map(|mixin| (*mixin).to_owned()).collect()
        })?;

        self.record(path.join(Segment::new(MIXIN_TYPES)), EventType::PropChange);
        Ok(())
    }

    /// Changes whether a node keeps its children ordered. This is a type
    /// level setting in a real store, so no event is recorded.
    pub fn set_orderable(&self, path: &NodePath, orderable: bool) -> Result<(), StoreError> {
        self.with_node(path, |node| node.orderable_children = orderable)
    }

    /// Moves the node at `path` before its sibling `before`, or last when
    /// `before` is `None`.
    pub fn order_before(&self, path: &NodePath, before: Option<&str>) -> Result<(), StoreError> {
        let (Some(parent), Some(name)) = (path.parent(), path.name()) else {
            return Err(StoreError::at(path, "the root node cannot be moved"));
        };
        let before = before
            .map(Segment::parse)
            .transpose()
            .map_err(|err| StoreError::at(path, err.to_string()))?;

        self.with_node(&parent, |parent_node| {
            let children = &mut parent_node.children;

            let Some(current) = children.iter().position(|child| child == name) else {
                return Err(StoreError::at(path, "node does not exist"));
            };
            let child = children.remove(current);

            match &before {
                Some(before) => match children.iter().position(|sibling| sibling == before) {
                    Some(index) => children.insert(index, child),
                    None => {
                        children.insert(current, child);
                        return Err(StoreError::at(path, format!("sibling {} does not exist", before)));
                    }
                },
                None => children.push(child),
            }

            Ok(())
        })??;

        self.record(path.clone(), EventType::NodeMove);
        Ok(())
    }

    /// Creates every node `model` defines, config and content alike, in the
    /// order the definitions give them. Every node created is journaled.
    pub fn load_model(&self, model: &ConfigurationModel) -> Result<(), StoreError> {
        let mut content: BTreeMap<&NodePath, &DefinitionNode> = BTreeMap::new();
        for module in model.modules() {
            for source in &module.content_sources {
                content.insert(source.root_path(), &source.definition.root);
            }
        }

        self.load_config(model, &content, &NodePath::root())
    }

    fn load_config(
        &self,
        model: &ConfigurationModel,
        content: &BTreeMap<&NodePath, &DefinitionNode>,
        parent: &NodePath,
    ) -> Result<(), StoreError> {
        for name in model.child_order(parent) {
            let path = parent.join(name);

            if let Some(node) = model.node(&path) {
                let primary_type = node
                    .primary_type()
                    .unwrap_or_else(|| DEFAULT_PRIMARY_TYPE.to_owned());
                self.add_node(&path, &primary_type)?;

                let mixins = node.mixin_types();
                if !mixins.is_empty() {
                    let mixins: Vec<&str> = mixins.iter().map(String::as_str).collect();
                    self.set_mixin_types(&path, &mixins)?;
                }

                for (name, property) in &node.properties {
                    if name != PRIMARY_TYPE && name != MIXIN_TYPES {
                        self.set_property(&path, name, property.value.clone())?;
                    }
                }

                self.load_config(model, content, &path)?;
            } else if let Some(root) = content.get(&path) {
                self.load_content(content, root)?;
            }
        }

        Ok(())
    }

    fn load_content(
        &self,
        content: &BTreeMap<&NodePath, &DefinitionNode>,
        node: &DefinitionNode,
    ) -> Result<(), StoreError> {
        let primary_type = node
            .primary_type()
            .unwrap_or_else(|| DEFAULT_PRIMARY_TYPE.to_owned());
        self.add_node(&node.path, &primary_type)?;

        for property in &node.properties {
            let Some(value) = &property.value else {
                continue;
            };

            match property.name.as_str() {
                PRIMARY_TYPE => {}
                MIXIN_TYPES => {
                    let mixins = value.strings();
                    let mixins: Vec<&str> = mixins.iter().map(String::as_str).collect();
                    self.set_mixin_types(&node.path, &mixins)?;
                }
                name => self.set_property(&node.path, name, value.clone())?,
            }
        }

        for child in &node.nodes {
            self.load_content(content, child)?;
        }

        // Content definitions nested below this one.
        for (root, nested) in content {
            if root.parent().as_ref() == Some(&node.path) && !self.node_exists(root)? {
                self.load_content(content, nested)?;
            }
        }

        Ok(())
    }

    /// Registers a namespace along with one node type in it.
    pub fn register_node_type(
        &self,
        prefix: &str,
        uri: &str,
        type_name: &str,
        cnd: &str,
    ) -> Result<(), StoreError> {
        self.namespaces.write().unwrap().insert(
            prefix.to_owned(),
            NamespaceInfo {
                uri: uri.to_owned(),
                cnd: Some(cnd.to_owned()),
            },
        );

        let path = NodePath::parse(NODE_TYPES_ROOT)
            .map_err(|err| StoreError::new(err.to_string()))?
            .child(&format!("{}:{}", prefix, type_name));
        self.record(path, EventType::NodeAdd);
        Ok(())
    }

    fn with_node<R>(
        &self,
        path: &NodePath,
        edit: impl FnOnce(&mut ContentNode) -> R,
    ) -> Result<R, StoreError> {
        let mut nodes = self.nodes.write().unwrap();
        let node = nodes
            .get_mut(path)
            .ok_or_else(|| StoreError::at(path, "node does not exist"))?;

        Ok(edit(node))
    }
}

impl ContentTree for MemoryContentTree {
    fn node_exists(&self, path: &NodePath) -> Result<bool, StoreError> {
        self.check_available()?;

        Ok(self.nodes.read().unwrap().contains_key(path))
    }

    fn get_node(&self, path: &NodePath) -> Result<Option<ContentNode>, StoreError> {
        self.check_available()?;

        Ok(self.nodes.read().unwrap().get(path).cloned())
    }

    fn get_property(&self, path: &NodePath) -> Result<Option<PropertyValue>, StoreError> {
        self.check_available()?;

        let (Some(parent), Some(name)) = (path.parent(), path.name()) else {
            return Ok(None);
        };

        let nodes = self.nodes.read().unwrap();
        let Some(node) = nodes.get(&parent) else {
            return Ok(None);
        };

        Ok(match name.name() {
            PRIMARY_TYPE => Some(PropertyValue::single(Value::Name(node.primary_type.clone()))),
            MIXIN_TYPES if !node.mixin_types.is_empty() => {
                Some(PropertyValue::names(node.mixin_types.iter().cloned()))
            }
            other => node.properties.get(other).cloned(),
        })
    }

    fn namespace(&self, prefix: &str) -> Result<Option<NamespaceInfo>, StoreError> {
        self.check_available()?;

        Ok(self.namespaces.read().unwrap().get(prefix).cloned())
    }
}
