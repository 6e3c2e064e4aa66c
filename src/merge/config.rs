//! Merging config diffs: new nodes, deletes, restores and modifications.

use crate::{
    error::ExportError,
    export::is_new_node,
    model::{Definition, DefinitionNode, DefinitionProperty, NamespaceDefinition, PropertyOperation},
    path::NodePath,
};

use super::{Locator, MergeContext};

const NAMESPACE_SOURCE: &str = "namespaces.json";

impl MergeContext<'_, '_> {
    pub(super) fn flag_parent(&mut self, path: &NodePath) {
        if let Some(parent) = path.parent() {
            self.reorder.insert(parent);
        }
    }

    pub(super) fn merge_config(&mut self, diff: &DefinitionNode) -> Result<(), ExportError> {
        let path = &diff.path;

        if diff.delete {
            return self.merge_delete(path);
        }

        if is_new_node(diff) {
            self.flag_parent(path);

            if self.model.deleted_node(path).is_some() {
                return self.restore(diff);
            }

            return self.merge_new(diff);
        }

        if diff.order_before.is_some() {
            self.flag_parent(path);
        }

        if self.model.node(path).is_none() {
            // Hints for content roots carry nothing else; the reorder pass
            // deals with them.
            if diff.properties.is_empty() && diff.nodes.is_empty() {
                return Ok(());
            }

            let parent = path.parent().unwrap_or_default();
            return Err(ExportError::missing_parent(path, &parent));
        }

        self.merge_properties(diff)?;

        for child in &diff.nodes {
            self.merge_config(child)?;
        }

        Ok(())
    }

    fn merge_new(&mut self, diff: &DefinitionNode) -> Result<(), ExportError> {
        let path = &diff.path;
        let (Some(parent), Some(name)) = (path.parent(), path.name().cloned()) else {
            return Ok(());
        };

        if self.model.node(&parent).is_none() {
            return Err(ExportError::missing_parent(path, &parent));
        }

        let module = self.route_module(path)?;
        let copied = self.copy_new(diff, module);

        if !self.mapper().should_start_definition(path) {
            if let Some(locator) = self.last_local(&parent, Some(module)) {
                if let Some(host) = self.node_at(&locator) {
                    log::debug!("Adding {} to the definition of {}", path, parent);

                    host.remove_node(&name);
                    host.nodes.push(copied);
                    return Ok(());
                }
            }
        }

        self.create_definition(module, copied);

        Ok(())
    }

    /// Turns an exported new subtree into definition nodes, creating
    /// separate definitions for descendants that should start their own.
    fn copy_new(&mut self, diff: &DefinitionNode, module: usize) -> DefinitionNode {
        let mut node = DefinitionNode::new(diff.path.clone());

        node.properties = diff
            .properties
            .iter()
            .filter(|property| property.operation != PropertyOperation::Delete)
            .map(|property| DefinitionProperty {
                operation: PropertyOperation::Replace,
                ..property.clone()
            })
            .collect();

        for child in &diff.nodes {
            if child.delete {
                continue;
            }

            let copied = self.copy_new(child, module);

            if self.mapper().should_start_definition(&child.path) {
                self.create_definition(module, copied);
            } else {
                node.nodes.push(copied);
            }
        }

        node
    }

    fn merge_delete(&mut self, path: &NodePath) -> Result<(), ExportError> {
        let Some(node) = self.model.node(path) else {
            return Ok(());
        };

        let last_upstream = node
            .definitions
            .iter()
            .rev()
            .find(|reference| !self.is_local(reference.module))
            .map(|reference| reference.module);
        let last_is_upstream = node
            .definitions
            .last()
            .map_or(false, |reference| !self.is_local(reference.module));

        let Some(last_upstream) = last_upstream else {
            log::debug!("Removing local definitions of {}", path);
            self.strip_local(path, None);
            return Ok(());
        };

        if last_is_upstream {
            self.strip_local(path, None);
        } else {
            let keep = self.last_local(path, None);
            self.strip_local(path, keep.as_ref());

            if let Some(locator) = keep {
                if let Some(stub) = self.node_at(&locator) {
                    *stub = DefinitionNode::delete_stub(path.clone());
                    return Ok(());
                }
            }
        }

        let module = self.route_module(path)?;

        if module < last_upstream {
            log::warn!(
                "{} is defined upstream in module {} after module {}; the delete may not take effect",
                path,
                self.modules[last_upstream].name,
                self.modules[module].name
            );
        }

        if let (Some(parent), Some(name)) = (path.parent(), path.name().cloned()) {
            if !self.mapper().should_start_definition(path) {
                if let Some(parent_locator) = self.last_local(&parent, Some(module)) {
                    if let Some(parent_node) = self.node_at(&parent_locator) {
                        parent_node.remove_node(&name);
                        parent_node.nodes.push(DefinitionNode::delete_stub(path.clone()));
                        return Ok(());
                    }
                }
            }
        }

        self.create_definition(module, DefinitionNode::delete_stub(path.clone()));

        Ok(())
    }

    /// Removes every local definition node at or below `path`, including
    /// those of deleted nodes, except `keep`.
    fn strip_local(&mut self, path: &NodePath, keep: Option<&Locator>) {
        let mut locators: Vec<Locator> = self
            .model
            .subtree(path)
            .chain(self.model.deleted_subtree(path))
            .flat_map(|node| node.definitions.iter())
            .filter(|reference| self.is_local(reference.module))
            .map(Locator::from)
            .filter(|locator| Some(locator) != keep)
            .collect();

        // Nested nodes go before the nodes that hold them.
        locators.sort_by(|a, b| b.path.depth().cmp(&a.path.depth()));

        for locator in &locators {
            self.remove_definition_node(locator);
        }
    }

    /// A node that was deleted by a definition exists again. Local delete
    /// stubs are dropped and whatever still differs is merged as a
    /// modification.
    fn restore(&mut self, diff: &DefinitionNode) -> Result<(), ExportError> {
        let path = &diff.path;

        let candidates: Vec<Locator> = self
            .model
            .deleted_node(path)
            .map(|record| {
                record
                    .definitions
                    .iter()
                    .filter(|reference| self.is_local(reference.module))
                    .map(Locator::from)
                    .collect()
            })
            .unwrap_or_default();

        let mut stubs = Vec::new();
        for locator in candidates {
            if self.node_at(&locator).map_or(false, |node| node.delete) {
                stubs.push(locator);
            }
        }

        if stubs.is_empty() {
            return self.merge_new(diff);
        }

        log::debug!("Restoring {}", path);

        for stub in &stubs {
            self.remove_definition_node(stub);
        }
        self.rebuild()?;

        if self.model.node(path).is_none() {
            return self.merge_new(diff);
        }

        let Some(delta) = self.exporter().export_delta(path)? else {
            return Ok(());
        };
        self.discovered.extend(delta.content_roots.iter().cloned());

        if delta.root.is_empty() {
            return Ok(());
        }

        self.merge_config(&delta.root)
    }

    pub(super) fn merge_namespace(&mut self, prefix: &str) -> Result<(), ExportError> {
        let Some(live) = self.service.tree.namespace(prefix)? else {
            log::warn!("Namespace {} is gone; namespaces are never removed from definitions", prefix);
            return Ok(());
        };

        if let Some(entry) = self.model.namespace(prefix) {
            if entry.uri == live.uri && entry.cnd == live.cnd {
                return Ok(());
            }

            let local = entry
                .definitions
                .iter()
                .rev()
                .find(|reference| self.is_local(reference.module))
                .cloned();

            if let Some(reference) = local {
                if let Some(Definition::Namespace(namespace)) =
                    self.modules[reference.module].definition_mut(reference.definition)
                {
                    log::debug!("Updating namespace {}", prefix);

                    namespace.uri = live.uri;
                    namespace.cnd = live.cnd;
                    return Ok(());
                }
            }
        }

        let node_types = NodePath::root()
            .child("jcr:system")
            .child("jcr:nodeTypes")
            .child(prefix);
        let module = self.route_module(&node_types)?;

        let source = self.modules[module]
            .config_sources
            .iter()
            .find(|source| {
                source
                    .definitions
                    .iter()
                    .any(|definition| matches!(definition, Definition::Namespace(_)))
            })
            .map(|source| source.path.clone())
            .unwrap_or_else(|| NAMESPACE_SOURCE.to_owned());

        log::debug!(
            "Creating namespace {} in {} of module {}",
            prefix,
            source,
            self.modules[module].name
        );

        self.modules[module]
            .config_source_or_insert(&source)
            .definitions
            .insert(
                0,
                Definition::Namespace(NamespaceDefinition::new(prefix, live.uri, live.cnd)),
            );

        Ok(())
    }
}
