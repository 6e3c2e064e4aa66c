//! Computes what changed in the live tree relative to the baseline.

pub mod ordering;

use std::collections::BTreeSet;

use crate::{
    category::{Category, CategoryClassifier, PROTECTED_PROPERTIES},
    content::{ContentNode, ContentTree},
    error::ExportError,
    model::{
        ConfigurationModel, ConfigurationNode, DefinitionNode, DefinitionProperty,
        PropertyOperation, PropertyValue, Value, MIXIN_TYPES, PRIMARY_TYPE,
    },
    path::{NodePath, Segment},
    path_pattern::PatternSet,
};

/// The difference between the live tree and the baseline below one path.
///
/// The tree uses the shape of a definition: properties carry the operation
/// that describes their change, removed nodes are delete stubs, and new nodes
/// carry every property as an add, starting with the primary type.
#[derive(Debug, Clone, PartialEq)]
pub struct DefinitionDiff {
    pub root: DefinitionNode,

    /// Live nodes found below config nodes that belong to the content
    /// category and are not yet the root of any content definition.
    pub content_roots: Vec<NodePath>,
}

impl DefinitionDiff {
    pub fn is_empty(&self) -> bool {
        self.root.is_empty() && self.content_roots.is_empty()
    }
}

/// Whether a diff node describes a node that does not exist in the baseline.
pub fn is_new_node(node: &DefinitionNode) -> bool {
    node.property(PRIMARY_TYPE)
        .map(|property| property.operation == PropertyOperation::Add)
        .unwrap_or(false)
}

pub struct TreeExporter<'a> {
    tree: &'a dyn ContentTree,
    model: &'a ConfigurationModel,
    classifier: &'a dyn CategoryClassifier,
    excluded: &'a PatternSet,
}

impl<'a> TreeExporter<'a> {
    pub fn new(
        tree: &'a dyn ContentTree,
        model: &'a ConfigurationModel,
        classifier: &'a dyn CategoryClassifier,
        excluded: &'a PatternSet,
    ) -> Self {
        Self {
            tree,
            model,
            classifier,
            excluded,
        }
    }

    fn is_excluded(&self, path: &NodePath) -> bool {
        self.excluded.matches_self_or_ancestor(path)
    }

    fn category(&self, path: &NodePath) -> Category {
        self.classifier.classify(path, false, self.model)
    }

    /// Computes the diff for a changed config path. Returns `None` when the
    /// path is excluded, belongs to the system category, or exists neither
    /// live nor in the baseline.
    pub fn export_delta(&self, path: &NodePath) -> Result<Option<DefinitionDiff>, ExportError> {
        if self.is_excluded(path) || self.category(path) == Category::System {
            return Ok(None);
        }

        let live = self.tree.get_node(path)?;
        let baseline = self.model.node(path);

        let mut content_roots = Vec::new();
        let root = match (live, baseline) {
            (None, None) => return Ok(None),
            (None, Some(_)) => DefinitionNode::delete_stub(path.clone()),
            (Some(live), Some(baseline)) => {
                self.delta(path, &live, baseline, &mut content_roots)?
            }
            (Some(_), None) => {
                let top = self.topmost_new(path);
                let Some(parent) = top.parent() else {
                    return Ok(None);
                };

                let (Some(parent_live), Some(top_live)) =
                    (self.tree.get_node(&parent)?, self.tree.get_node(&top)?)
                else {
                    return Err(ExportError::missing_parent(path, &parent));
                };

                let mut root = self.export_new(&top, &top_live, &mut content_roots)?;
                root.order_before = self.new_child_hint(&parent, &parent_live, &top);
                root
            }
        };

        log::trace!("Computed diff for {}: {:?}", path, root);

        Ok(Some(DefinitionDiff {
            root,
            content_roots,
        }))
    }

    /// The shallowest ancestor-or-self of `path` that is missing from the
    /// baseline. The root is always in the baseline.
    fn topmost_new(&self, path: &NodePath) -> NodePath {
        (1..=path.depth())
            .map(|depth| path.truncate(depth))
            .find(|candidate| self.model.node(candidate).is_none())
            .unwrap_or_else(|| path.clone())
    }

    /// A new node placed anywhere but last among the siblings the baseline
    /// knows gets a hint naming the sibling it precedes.
    fn new_child_hint(
        &self,
        parent: &NodePath,
        parent_live: &ContentNode,
        child: &NodePath,
    ) -> Option<String> {
        let name = child.name()?;

        if !self.reorders_children(parent, parent_live) {
            return None;
        }

        let mut known = self.model.child_order(parent);
        known.push(name.clone());

        let (_, expected) = ordering::align(&known, &self.expected_order(parent, parent_live));
        let position = expected.iter().position(|candidate| candidate == name)?;

        expected.get(position + 1).map(ToString::to_string)
    }

    fn reorders_children(&self, path: &NodePath, live: &ContentNode) -> bool {
        let suppressed = self
            .model
            .node(path)
            .map(|node| node.ignore_reordered_children)
            .unwrap_or(false);

        live.orderable_children && !suppressed
    }

    /// The live children that take part in ordering.
    pub fn expected_order(&self, path: &NodePath, live: &ContentNode) -> Vec<Segment> {
        live.children
            .iter()
            .filter(|child| {
                let child_path = path.join((*child).clone());
                !self.is_excluded(&child_path) && self.category(&child_path) != Category::System
            })
            .cloned()
            .collect()
    }

    fn delta(
        &self,
        path: &NodePath,
        live: &ContentNode,
        baseline: &ConfigurationNode,
        content_roots: &mut Vec<NodePath>,
    ) -> Result<DefinitionNode, ExportError> {
        let mut node = DefinitionNode::new(path.clone());

        if let Some(primary_type) = baseline.primary_type() {
            if primary_type != live.primary_type {
                node.set_property(DefinitionProperty::new(
                    PRIMARY_TYPE,
                    PropertyOperation::Override,
                    PropertyValue::single(Value::Name(live.primary_type.clone())),
                ));
            }
        }

        let baseline_mixins: BTreeSet<String> = baseline.mixin_types().into_iter().collect();
        let live_mixins: BTreeSet<String> = live.mixin_types.iter().cloned().collect();
        if baseline_mixins != live_mixins {
            if live_mixins.is_empty() {
                node.set_property(DefinitionProperty::delete(MIXIN_TYPES));
            } else {
                node.set_property(DefinitionProperty::new(
                    MIXIN_TYPES,
                    PropertyOperation::Override,
                    PropertyValue::names(live.mixin_types.iter().cloned()),
                ));
            }
        }

        for (name, value) in &live.properties {
            if !self.exports_property(path, name) {
                continue;
            }

            let operation = match baseline.property(name) {
                None => {
                    let property_path = path.join(Segment::new(name.as_str()));
                    if self.model.deleted_property(&property_path).is_some() {
                        PropertyOperation::Override
                    } else {
                        PropertyOperation::Add
                    }
                }
                Some(existing) if existing.value == *value => continue,
                Some(existing) if existing.value.shape_differs(value) => {
                    PropertyOperation::Override
                }
                Some(_) => PropertyOperation::Replace,
            };

            node.set_property(DefinitionProperty::new(name.as_str(), operation, value.clone()));
        }

        for name in baseline.properties.keys() {
            if self.exports_property(path, name) && !live.properties.contains_key(name) {
                node.set_property(DefinitionProperty::delete(name.as_str()));
            }
        }

        for child in &live.children {
            let child_path = path.join(child.clone());

            if self.is_excluded(&child_path) {
                continue;
            }

            match self.category(&child_path) {
                Category::System => continue,
                Category::Content => {
                    if self.model.content_entries_at(&child_path).next().is_none() {
                        content_roots.push(child_path);
                    }
                    continue;
                }
                Category::Config => {}
            }

            let Some(child_live) = self.tree.get_node(&child_path)? else {
                continue;
            };

            match self.model.node(&child_path) {
                Some(child_baseline) => {
                    let child_delta =
                        self.delta(&child_path, &child_live, child_baseline, content_roots)?;
                    if !child_delta.is_empty() {
                        node.nodes.push(child_delta);
                    }
                }
                None => node
                    .nodes
                    .push(self.export_new(&child_path, &child_live, content_roots)?),
            }
        }

        for child in &baseline.children {
            let child_path = path.join(child.clone());

            if !live.children.contains(child) && !self.is_excluded(&child_path) {
                node.nodes.push(DefinitionNode::delete_stub(child_path));
            }
        }

        if self.reorders_children(path, live) {
            self.add_order_hints(path, live, &mut node);
        }

        Ok(node)
    }

    fn add_order_hints(&self, path: &NodePath, live: &ContentNode, node: &mut DefinitionNode) {
        let expected = self.expected_order(path, live);

        let mut current = self.model.child_order(path);
        for child in &expected {
            if !current.contains(child) {
                current.push(child.clone());
            }
        }

        for (moved, before) in ordering::order_hints(&current, &expected) {
            let child_path = path.join(moved.clone());

            if node.node(&moved).is_none() {
                node.nodes.push(DefinitionNode::new(child_path));
            }

            if let Some(child) = node.node_mut(&moved) {
                child.order_before = Some(before.to_string());
            }
        }
    }

    fn exports_property(&self, path: &NodePath, name: &str) -> bool {
        name != PRIMARY_TYPE
            && name != MIXIN_TYPES
            && !PROTECTED_PROPERTIES.contains(&name)
            && !self.is_excluded(&path.join(Segment::new(name)))
    }

    /// Exports a node missing from the baseline in full, with every property
    /// as an add.
    fn export_new(
        &self,
        path: &NodePath,
        live: &ContentNode,
        content_roots: &mut Vec<NodePath>,
    ) -> Result<DefinitionNode, ExportError> {
        let mut node = full_node(path, live, PropertyOperation::Add, |name| {
            self.exports_property(path, name)
        });

        for child in &live.children {
            let child_path = path.join(child.clone());

            if self.is_excluded(&child_path) {
                continue;
            }

            match self.category(&child_path) {
                Category::System => continue,
                Category::Content => {
                    content_roots.push(child_path);
                    continue;
                }
                Category::Config => {}
            }

            if let Some(child_live) = self.tree.get_node(&child_path)? {
                node.nodes
                    .push(self.export_new(&child_path, &child_live, content_roots)?);
            }
        }

        Ok(node)
    }

    /// Exports a live content subtree in full, leaving out the subtrees in
    /// `nested_roots`, which belong to other content definitions.
    pub fn export_content(
        &self,
        root: &NodePath,
        nested_roots: &BTreeSet<NodePath>,
    ) -> Result<Option<DefinitionNode>, ExportError> {
        let Some(live) = self.tree.get_node(root)? else {
            return Ok(None);
        };

        self.export_content_node(root, &live, nested_roots).map(Some)
    }

    fn export_content_node(
        &self,
        path: &NodePath,
        live: &ContentNode,
        nested_roots: &BTreeSet<NodePath>,
    ) -> Result<DefinitionNode, ExportError> {
        let mut node = full_node(path, live, PropertyOperation::Replace, |name| {
            !self.is_excluded(&path.join(Segment::new(name)))
        });

        for child in &live.children {
            let child_path = path.join(child.clone());

            if nested_roots.contains(&child_path)
                || self.is_excluded(&child_path)
                || self.category(&child_path) == Category::System
            {
                continue;
            }

            if let Some(child_live) = self.tree.get_node(&child_path)? {
                node.nodes
                    .push(self.export_content_node(&child_path, &child_live, nested_roots)?);
            }
        }

        Ok(node)
    }
}

/// A node with its primary type, mixins and every property accepted by
/// `keep`, all using `operation`.
fn full_node(
    path: &NodePath,
    live: &ContentNode,
    operation: PropertyOperation,
    keep: impl Fn(&str) -> bool,
) -> DefinitionNode {
    let mut node = DefinitionNode::new(path.clone());

    node.set_property(DefinitionProperty::new(
        PRIMARY_TYPE,
        operation,
        PropertyValue::single(Value::Name(live.primary_type.clone())),
    ));

    if !live.mixin_types.is_empty() {
        node.set_property(DefinitionProperty::new(
            MIXIN_TYPES,
            operation,
            PropertyValue::names(live.mixin_types.iter().cloned()),
        ));
    }

    for (name, value) in &live.properties {
        if name != PRIMARY_TYPE && name != MIXIN_TYPES && keep(name) {
            node.set_property(DefinitionProperty::new(name.as_str(), operation, value.clone()));
        }
    }

    node
}
