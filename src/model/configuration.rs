//! The materialized baseline: every module applied in order into one tree.

use std::collections::BTreeMap;

use crate::{
    category::Category,
    path::{NodePath, Segment},
};

use super::{
    definition::{DefinitionId, Module, PropertyOperation},
    value::{PropertyValue, MIXIN_TYPES, PRIMARY_TYPE},
};

/// Points at one definition node that contributed to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionRef {
    /// Index of the module in the model's module list.
    pub module: usize,

    /// Path of the source inside the module.
    pub source: String,

    pub definition: DefinitionId,

    /// Path of the definition node inside that definition.
    pub path: NodePath,

    /// Global position of this contribution while the model was built.
    pub apply_order: u64,
}

/// One definition property applied to a configuration property.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyContribution {
    pub reference: DefinitionRef,
    pub operation: PropertyOperation,
    pub value: Option<PropertyValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationProperty {
    pub name: String,
    pub value: PropertyValue,

    /// Every contribution in the order it was applied, including the history
    /// from before a delete when the property was created again later.
    pub definitions: Vec<PropertyContribution>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationNode {
    pub path: NodePath,
    pub children: Vec<Segment>,
    pub properties: BTreeMap<String, ConfigurationProperty>,
    pub definitions: Vec<DefinitionRef>,
    pub residual_child_category: Option<Category>,
    pub ignore_reordered_children: bool,
}

impl ConfigurationNode {
    pub(crate) fn new(path: NodePath) -> Self {
        Self {
            path,
            children: Vec::new(),
            properties: BTreeMap::new(),
            definitions: Vec::new(),
            residual_child_category: None,
            ignore_reordered_children: false,
        }
    }

    pub fn property(&self, name: &str) -> Option<&ConfigurationProperty> {
        self.properties.get(name)
    }

    pub fn primary_type(&self) -> Option<String> {
        self.property(PRIMARY_TYPE)
            .and_then(|property| property.value.values().first())
            .map(ToString::to_string)
    }

    pub fn mixin_types(&self) -> Vec<String> {
        self.property(MIXIN_TYPES)
            .map(|property| property.value.strings())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceEntry {
    pub prefix: String,
    pub uri: String,
    pub cnd: Option<String>,
    pub definitions: Vec<DefinitionRef>,
}

/// The root of one content definition, recorded after all config is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentEntry {
    pub root: NodePath,
    pub module: usize,
    pub source: String,
    pub definition: DefinitionId,
    pub order_before: Option<String>,
    pub apply_order: u64,
}

#[derive(Debug, Clone)]
pub struct ConfigurationModel {
    pub(crate) modules: Vec<Module>,
    pub(crate) nodes: BTreeMap<NodePath, ConfigurationNode>,
    pub(crate) deleted_nodes: BTreeMap<NodePath, ConfigurationNode>,
    pub(crate) deleted_properties: BTreeMap<NodePath, ConfigurationProperty>,
    pub(crate) namespaces: BTreeMap<String, NamespaceEntry>,
    pub(crate) content: Vec<ContentEntry>,
}

impl ConfigurationModel {
    /// A model with no modules, holding only the root node.
    pub fn empty() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(NodePath::root(), ConfigurationNode::new(NodePath::root()));

        Self {
            modules: Vec::new(),
            nodes,
            deleted_nodes: BTreeMap::new(),
            deleted_properties: BTreeMap::new(),
            namespaces: BTreeMap::new(),
            content: Vec::new(),
        }
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn into_modules(self) -> Vec<Module> {
        self.modules
    }

    pub fn module(&self, index: usize) -> Option<&Module> {
        self.modules.get(index)
    }

    pub fn module_index(&self, name: &str) -> Option<usize> {
        self.modules.iter().position(|module| module.name == name)
    }

    pub fn is_exported(&self, module: usize) -> bool {
        self.modules
            .get(module)
            .map(Module::is_exported)
            .unwrap_or(false)
    }

    pub fn root(&self) -> &ConfigurationNode {
        &self.nodes[&NodePath::root()]
    }

    pub fn node(&self, path: &NodePath) -> Option<&ConfigurationNode> {
        self.nodes.get(path)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ConfigurationNode> {
        self.nodes.values()
    }

    /// The node at `path` and all of its descendants, parents first.
    pub fn subtree<'a>(&'a self, path: &'a NodePath) -> impl Iterator<Item = &'a ConfigurationNode> {
        self.nodes
            .range(path.clone()..)
            .take_while(move |(candidate, _)| candidate.starts_with(path))
            .map(|(_, node)| node)
    }

    /// The record of a node that existed at some point while the model was
    /// built but was deleted by a later definition.
    pub fn deleted_node(&self, path: &NodePath) -> Option<&ConfigurationNode> {
        self.deleted_nodes.get(path)
    }

    pub fn deleted_subtree<'a>(
        &'a self,
        path: &'a NodePath,
    ) -> impl Iterator<Item = &'a ConfigurationNode> {
        self.deleted_nodes
            .range(path.clone()..)
            .take_while(move |(candidate, _)| candidate.starts_with(path))
            .map(|(_, node)| node)
    }

    /// Looks up a property by its full path.
    pub fn property(&self, path: &NodePath) -> Option<&ConfigurationProperty> {
        let name = path.name()?;

        self.node(&path.parent()?)?.property(name.name())
    }

    pub fn deleted_property(&self, path: &NodePath) -> Option<&ConfigurationProperty> {
        self.deleted_properties.get(path)
    }

    /// The live property if there is one, else the record of the deleted one.
    pub fn property_history(&self, path: &NodePath) -> Option<&ConfigurationProperty> {
        self.property(path).or_else(|| self.deleted_property(path))
    }

    pub fn namespace(&self, prefix: &str) -> Option<&NamespaceEntry> {
        self.namespaces.get(prefix)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &NamespaceEntry> {
        self.namespaces.values()
    }

    pub fn content_entries(&self) -> &[ContentEntry] {
        &self.content
    }

    /// Content entries rooted at `root`, upstream first.
    pub fn content_entries_at<'a>(
        &'a self,
        root: &'a NodePath,
    ) -> impl Iterator<Item = &'a ContentEntry> {
        self.content.iter().filter(move |entry| &entry.root == root)
    }

    /// Whether `path` is the root of some content definition, or sits below
    /// one.
    pub fn is_content_path(&self, path: &NodePath) -> bool {
        self.content.iter().any(|entry| path.starts_with(&entry.root))
    }

    /// The order the definitions give the children of `parent`: config
    /// children first, as the builder left them, then content roots placed
    /// by their own order hints.
    pub fn child_order(&self, parent: &NodePath) -> Vec<Segment> {
        let mut order = self
            .node(parent)
            .map(|node| node.children.clone())
            .unwrap_or_default();

        let mut entries: Vec<_> = self
            .content
            .iter()
            .filter(|entry| entry.root.parent().as_ref() == Some(parent))
            .collect();
        entries.sort_by_key(|entry| entry.apply_order);

        for entry in entries {
            let Some(name) = entry.root.name() else {
                continue;
            };

            if order.contains(name) {
                continue;
            }

            let position = match entry.order_before.as_deref() {
                Some("") => Some(0),
                Some(before) => Segment::parse(before)
                    .ok()
                    .and_then(|before| order.iter().position(|child| *child == before)),
                None => None,
            };

            match position {
                Some(index) => order.insert(index, name.clone()),
                None => order.push(name.clone()),
            }
        }

        order
    }
}

/// Replays property contributions into the value they produce.
pub fn replay<'a, I>(contributions: I) -> Option<PropertyValue>
where
    I: IntoIterator<Item = &'a PropertyContribution>,
{
    let mut current: Option<PropertyValue> = None;

    for contribution in contributions {
        current = match (contribution.operation, &contribution.value) {
            (PropertyOperation::Delete, _) | (_, None) => None,
            (PropertyOperation::Add, Some(value)) => Some(append(current, value)),
            (_, Some(value)) => Some(value.clone()),
        };
    }

    current
}

/// The result of adding `value` to `current` with an add operation.
pub(crate) fn append(current: Option<PropertyValue>, value: &PropertyValue) -> PropertyValue {
    match current {
        Some(PropertyValue::Multiple {
            value_type,
            mut values,
        }) if value.is_multiple() && value.value_type() == value_type => {
            values.extend(value.values().iter().cloned());
            PropertyValue::Multiple { value_type, values }
        }
        _ => value.clone(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::model::{Value, ValueType};

    fn contribution(operation: PropertyOperation, value: Option<PropertyValue>) -> PropertyContribution {
        PropertyContribution {
            reference: DefinitionRef {
                module: 0,
                source: "main.json".to_owned(),
                definition: DefinitionId::new(),
                path: NodePath::root(),
                apply_order: 0,
            },
            operation,
            value,
        }
    }

    fn strings(values: &[&str]) -> PropertyValue {
        PropertyValue::multiple(
            ValueType::String,
            values.iter().map(|value| Value::from(*value)).collect(),
        )
    }

    #[test]
    fn replay_operations() {
        let chain = vec![
            contribution(PropertyOperation::Replace, Some(strings(&["a"]))),
            contribution(PropertyOperation::Add, Some(strings(&["b", "c"]))),
        ];
        assert_eq!(replay(&chain), Some(strings(&["a", "b", "c"])));

        let deleted = vec![
            contribution(PropertyOperation::Replace, Some(strings(&["a"]))),
            contribution(PropertyOperation::Delete, None),
        ];
        assert_eq!(replay(&deleted), None);

        let overridden = vec![
            contribution(PropertyOperation::Replace, Some(strings(&["a"]))),
            contribution(PropertyOperation::Override, Some(PropertyValue::single(3i64))),
        ];
        assert_eq!(replay(&overridden), Some(PropertyValue::single(3i64)));
    }

    #[test]
    fn empty_model_has_root() {
        let model = ConfigurationModel::empty();

        assert!(model.node(&NodePath::root()).is_some());
        assert!(model.root().children.is_empty());
        assert_eq!(model.root().primary_type(), None);
    }
}
