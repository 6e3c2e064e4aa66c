//! The declarative side: modules, their sources, and the definitions inside
//! them.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::{
    category::Category,
    path::{NodePath, Segment},
};

use super::value::{PropertyValue, PRIMARY_TYPE};

/// Identifies one definition for as long as the process runs, across clones of
/// the module set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DefinitionId(u64);

impl DefinitionId {
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);

        DefinitionId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for DefinitionId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyOperation {
    #[default]
    Replace,
    Add,
    Override,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionProperty {
    pub name: String,

    #[serde(default, skip_serializing_if = "is_default_operation")]
    pub operation: PropertyOperation,

    /// Absent exactly when the operation is a delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<PropertyValue>,
}

fn is_default_operation(operation: &PropertyOperation) -> bool {
    *operation == PropertyOperation::Replace
}

impl DefinitionProperty {
    pub fn new(name: impl Into<String>, operation: PropertyOperation, value: PropertyValue) -> Self {
        Self {
            name: name.into(),
            operation,
            value: Some(value),
        }
    }

    pub fn delete(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operation: PropertyOperation::Delete,
            value: None,
        }
    }
}

/// One node inside a definition, with its properties and nested nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionNode {
    pub path: NodePath,

    #[serde(default, skip_serializing_if = "is_false")]
    pub delete: bool,

    /// Name of the sibling this node must be placed before. The empty string
    /// places it first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_before: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_reordered_children: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub residual_child_category: Option<Category>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<DefinitionProperty>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<DefinitionNode>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl DefinitionNode {
    pub fn new(path: NodePath) -> Self {
        Self {
            path,
            delete: false,
            order_before: None,
            ignore_reordered_children: None,
            residual_child_category: None,
            properties: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn delete_stub(path: NodePath) -> Self {
        Self {
            delete: true,
            ..Self::new(path)
        }
    }

    pub fn name(&self) -> Option<&Segment> {
        self.path.name()
    }

    pub fn primary_type(&self) -> Option<String> {
        self.property(PRIMARY_TYPE)
            .and_then(|property| property.value.as_ref())
            .and_then(|value| value.values().first())
            .map(ToString::to_string)
    }

    /// True when this node says nothing at all and can be dropped.
    pub fn is_empty(&self) -> bool {
        !self.delete
            && self.order_before.is_none()
            && self.ignore_reordered_children.is_none()
            && self.residual_child_category.is_none()
            && self.properties.is_empty()
            && self.nodes.is_empty()
    }

    pub fn property(&self, name: &str) -> Option<&DefinitionProperty> {
        self.properties.iter().find(|property| property.name == name)
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut DefinitionProperty> {
        self.properties
            .iter_mut()
            .find(|property| property.name == name)
    }

    /// Inserts a property, replacing one with the same name in place so the
    /// property order of the definition is kept.
    pub fn set_property(&mut self, property: DefinitionProperty) {
        match self.property_mut(&property.name) {
            Some(existing) => *existing = property,
            None => self.properties.push(property),
        }
    }

    /// Shorthand for a plain `Replace` property.
    pub fn set_value(&mut self, name: &str, value: PropertyValue) {
        self.set_property(DefinitionProperty::new(
            name,
            PropertyOperation::Replace,
            value,
        ));
    }

    pub fn remove_property(&mut self, name: &str) -> Option<DefinitionProperty> {
        let index = self
            .properties
            .iter()
            .position(|property| property.name == name)?;

        Some(self.properties.remove(index))
    }

    pub fn node(&self, segment: &Segment) -> Option<&DefinitionNode> {
        self.nodes.iter().find(|node| node.name() == Some(segment))
    }

    pub fn node_mut(&mut self, segment: &Segment) -> Option<&mut DefinitionNode> {
        self.nodes
            .iter_mut()
            .find(|node| node.name() == Some(segment))
    }

    pub fn remove_node(&mut self, segment: &Segment) -> Option<DefinitionNode> {
        let index = self
            .nodes
            .iter()
            .position(|node| node.name() == Some(segment))?;

        Some(self.nodes.remove(index))
    }

    /// Finds the nested node at `path`, which must be at or below this node.
    pub fn find(&self, path: &NodePath) -> Option<&DefinitionNode> {
        let relative = path.relative_to(&self.path)?;

        let mut current = self;
        for segment in relative {
            current = current.node(segment)?;
        }

        Some(current)
    }

    pub fn find_mut(&mut self, path: &NodePath) -> Option<&mut DefinitionNode> {
        let relative = path.relative_to(&self.path)?.to_vec();

        let mut current = self;
        for segment in &relative {
            current = current.node_mut(segment)?;
        }

        Some(current)
    }

    /// Removes the nested node at `path`. The node itself cannot be removed
    /// this way; that is up to whoever owns it.
    pub fn remove_descendant(&mut self, path: &NodePath) -> Option<DefinitionNode> {
        let parent = path.parent()?;
        let name = path.name()?;

        self.find_mut(&parent)?.remove_node(name)
    }

    /// Drops nested nodes that say nothing, bottom up.
    pub fn prune_empty(&mut self) {
        for node in &mut self.nodes {
            node.prune_empty();
        }

        self.nodes.retain(|node| !node.is_empty());
    }

    /// Visits this node and every nested node, depth first, parents first.
    pub fn walk<'a>(&'a self, visitor: &mut impl FnMut(&'a DefinitionNode)) {
        visitor(self);

        for node in &self.nodes {
            node.walk(visitor);
        }
    }
}

/// A namespace registration, carried together with its type definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceDefinition {
    #[serde(skip, default)]
    pub id: DefinitionId,

    pub prefix: String,
    pub uri: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cnd: Option<String>,
}

impl NamespaceDefinition {
    pub fn new(prefix: impl Into<String>, uri: impl Into<String>, cnd: Option<String>) -> Self {
        Self {
            id: DefinitionId::new(),
            prefix: prefix.into(),
            uri: uri.into(),
            cnd,
        }
    }
}

/// A definition of the desired state of one configuration subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDefinition {
    #[serde(skip, default)]
    pub id: DefinitionId,

    pub root: DefinitionNode,
}

impl ConfigDefinition {
    pub fn new(root: DefinitionNode) -> Self {
        Self {
            id: DefinitionId::new(),
            root,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Definition {
    Namespace(NamespaceDefinition),
    Config(ConfigDefinition),
}

impl Definition {
    pub fn id(&self) -> DefinitionId {
        match self {
            Definition::Namespace(namespace) => namespace.id,
            Definition::Config(config) => config.id,
        }
    }

    pub fn as_config(&self) -> Option<&ConfigDefinition> {
        match self {
            Definition::Config(config) => Some(config),
            Definition::Namespace(_) => None,
        }
    }

    pub fn as_config_mut(&mut self) -> Option<&mut ConfigDefinition> {
        match self {
            Definition::Config(config) => Some(config),
            Definition::Namespace(_) => None,
        }
    }
}

/// A file holding any number of config and namespace definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSource {
    /// Path of the file, relative to the module's config root.
    pub path: String,
    pub definitions: Vec<Definition>,
}

impl ConfigSource {
    pub fn new(path: impl Into<String>, definitions: Vec<Definition>) -> Self {
        Self {
            path: path.into(),
            definitions,
        }
    }

    pub fn definition(&self, id: DefinitionId) -> Option<&Definition> {
        self.definitions
            .iter()
            .find(|definition| definition.id() == id)
    }

    pub fn definition_mut(&mut self, id: DefinitionId) -> Option<&mut Definition> {
        self.definitions
            .iter_mut()
            .find(|definition| definition.id() == id)
    }

    pub fn config_definitions(&self) -> impl Iterator<Item = &ConfigDefinition> {
        self.definitions.iter().filter_map(Definition::as_config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentDefinition {
    #[serde(skip, default)]
    pub id: DefinitionId,

    pub root: DefinitionNode,
}

impl ContentDefinition {
    pub fn new(root: DefinitionNode) -> Self {
        Self {
            id: DefinitionId::new(),
            root,
        }
    }
}

/// A file holding exactly one content definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSource {
    /// Path of the file, relative to the module's content root.
    pub path: String,
    pub definition: ContentDefinition,
}

impl ContentSource {
    pub fn new(path: impl Into<String>, root: DefinitionNode) -> Self {
        Self {
            path: path.into(),
            definition: ContentDefinition::new(root),
        }
    }

    pub fn root_path(&self) -> &NodePath {
        &self.definition.root.path
    }
}

/// A named bundle of sources. Modules with an `mvn_path` are the ones the
/// exporter is allowed to write to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mvn_path: Option<String>,

    /// Kept sorted by path, which is also the order they apply in.
    #[serde(default)]
    pub config_sources: Vec<ConfigSource>,

    #[serde(default)]
    pub content_sources: Vec<ContentSource>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mvn_path: None,
            config_sources: Vec::new(),
            content_sources: Vec::new(),
        }
    }

    pub fn exported(name: impl Into<String>, mvn_path: impl Into<String>) -> Self {
        Self {
            mvn_path: Some(mvn_path.into()),
            ..Self::new(name)
        }
    }

    pub fn is_exported(&self) -> bool {
        self.mvn_path.is_some()
    }

    pub fn config_source(&self, path: &str) -> Option<&ConfigSource> {
        self.config_sources
            .iter()
            .find(|source| source.path == path)
    }

    pub fn config_source_mut(&mut self, path: &str) -> Option<&mut ConfigSource> {
        self.config_sources
            .iter_mut()
            .find(|source| source.path == path)
    }

    /// Returns the config source at `path`, creating it at its sorted
    /// position if it does not exist yet.
    pub fn config_source_or_insert(&mut self, path: &str) -> &mut ConfigSource {
        let index = match self
            .config_sources
            .binary_search_by(|source| source.path.as_str().cmp(path))
        {
            Ok(index) => index,
            Err(index) => {
                self.config_sources
                    .insert(index, ConfigSource::new(path, Vec::new()));
                index
            }
        };

        &mut self.config_sources[index]
    }

    pub fn content_source(&self, path: &str) -> Option<&ContentSource> {
        self.content_sources
            .iter()
            .find(|source| source.path == path)
    }

    pub fn content_source_for_root(&self, root: &NodePath) -> Option<&ContentSource> {
        self.content_sources
            .iter()
            .find(|source| source.root_path() == root)
    }

    pub fn content_source_for_root_mut(&mut self, root: &NodePath) -> Option<&mut ContentSource> {
        self.content_sources
            .iter_mut()
            .find(|source| source.root_path() == root)
    }

    /// Adds a content source, picking a file name that is not taken yet by
    /// appending a counter to the stem.
    pub fn add_content_source(&mut self, path: &str, root: DefinitionNode) -> &ContentSource {
        let mut candidate = path.to_owned();
        let mut counter = 1;

        while self.content_source(&candidate).is_some() {
            candidate = match path.rsplit_once('.') {
                Some((stem, extension)) => format!("{}-{}.{}", stem, counter, extension),
                None => format!("{}-{}", path, counter),
            };
            counter += 1;
        }

        let index = self
            .content_sources
            .binary_search_by(|source| source.path.as_str().cmp(&candidate))
            .unwrap_or_else(|index| index);
        self.content_sources
            .insert(index, ContentSource::new(candidate, root));

        &self.content_sources[index]
    }

    pub fn remove_content_source(&mut self, root: &NodePath) -> Option<ContentSource> {
        let index = self
            .content_sources
            .iter()
            .position(|source| source.root_path() == root)?;

        Some(self.content_sources.remove(index))
    }

    /// Finds a config or namespace definition by ID, along with the path of
    /// its source.
    pub fn definition(&self, id: DefinitionId) -> Option<(&str, &Definition)> {
        self.config_sources.iter().find_map(|source| {
            source
                .definition(id)
                .map(|definition| (source.path.as_str(), definition))
        })
    }

    pub fn definition_mut(&mut self, id: DefinitionId) -> Option<&mut Definition> {
        self.config_sources
            .iter_mut()
            .find_map(|source| source.definition_mut(id))
    }

    pub fn config_definition_mut(&mut self, id: DefinitionId) -> Option<&mut ConfigDefinition> {
        self.definition_mut(id).and_then(Definition::as_config_mut)
    }

    pub fn remove_definition(&mut self, id: DefinitionId) -> Option<Definition> {
        for source in &mut self.config_sources {
            if let Some(index) = source
                .definitions
                .iter()
                .position(|definition| definition.id() == id)
            {
                return Some(source.definitions.remove(index));
            }
        }

        None
    }

    /// Drops nodes and definitions that say nothing, then sources without
    /// definitions, and restores the sorted source order.
    pub fn rebuild(&mut self) {
        for source in &mut self.config_sources {
            for definition in &mut source.definitions {
                if let Definition::Config(config) = definition {
                    config.root.prune_empty();
                }
            }

            source.definitions.retain(|definition| match definition {
                Definition::Config(config) => !config.root.is_empty(),
                Definition::Namespace(_) => true,
            });
        }

        self.config_sources
            .retain(|source| !source.definitions.is_empty());
        self.config_sources
            .sort_by(|a, b| a.path.cmp(&b.path));
        self.content_sources
            .sort_by(|a, b| a.path.cmp(&b.path));
    }
}
