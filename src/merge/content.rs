//! Content sources are exported whole: a change anywhere below a content root
//! marks its source for regeneration instead of being merged piecemeal.

use std::collections::BTreeSet;

use crate::{
    change_batch::CategoryChanges,
    error::ExportError,
    model::DefinitionNode,
    path::NodePath,
};

use super::MergeContext;

impl MergeContext<'_, '_> {
    pub(super) fn merge_content(&mut self, changes: &CategoryChanges) -> Result<(), ExportError> {
        for path in changes.deleted() {
            self.check_interrupt()?;
            self.delete_content(path);
        }

        let discovered = std::mem::take(&mut self.discovered);
        let added: BTreeSet<&NodePath> = changes.added().iter().chain(&discovered).collect();

        for path in added {
            self.check_interrupt()?;
            self.upsert_content(path)?;
        }

        for path in changes.changed() {
            self.check_interrupt()?;
            self.upsert_content(path)?;
        }

        Ok(())
    }

    /// Every content source root in the working modules, with its module.
    fn content_roots(&self) -> Vec<(usize, NodePath)> {
        self.modules
            .iter()
            .enumerate()
            .flat_map(|(index, module)| {
                module
                    .content_sources
                    .iter()
                    .map(move |source| (index, source.root_path().clone()))
            })
            .collect()
    }

    /// The content source whose root is the deepest one at or above `path`.
    /// Between sources with the same root the most downstream module wins.
    fn covering_source(&self, path: &NodePath) -> Option<(usize, NodePath)> {
        self.content_roots()
            .into_iter()
            .filter(|(_, root)| path.starts_with(root))
            .max_by(|(a_module, a_root), (b_module, b_root)| {
                a_root
                    .depth()
                    .cmp(&b_root.depth())
                    .then(a_module.cmp(b_module))
            })
    }

    fn upsert_content(&mut self, path: &NodePath) -> Result<(), ExportError> {
        match self.covering_source(path) {
            Some((module, root)) if self.is_local(module) => {
                // A moved root also changes its parent's order.
                if root == *path {
                    self.flag_parent(path);
                }
                self.regenerate.insert((module, root));
            }
            Some((module, root)) => {
                log::warn!(
                    "Not exporting {}: content {} is defined upstream in module {}",
                    path,
                    root,
                    self.modules[module].name
                );
            }
            None => self.create_content_source(path)?,
        }

        Ok(())
    }

    fn create_content_source(&mut self, path: &NodePath) -> Result<(), ExportError> {
        let module = self.route_module(path)?;
        let file = self.mapper().route(path, true).file;

        let source_path = self.modules[module]
            .add_content_source(&file, DefinitionNode::new(path.clone()))
            .path
            .clone();
        log::debug!(
            "Creating content source {} for {} in module {}",
            source_path,
            path,
            self.modules[module].name
        );

        self.regenerate.insert((module, path.clone()));
        self.flag_parent(path);

        Ok(())
    }

    fn delete_content(&mut self, path: &NodePath) {
        let removed: Vec<(usize, NodePath)> = self
            .content_roots()
            .into_iter()
            .filter(|(_, root)| root.starts_with(path))
            .collect();

        for (module, root) in removed {
            if self.is_local(module) {
                log::debug!("Removing content source for {}", root);

                self.modules[module].remove_content_source(&root);
                self.regenerate.remove(&(module, root));
            } else {
                log::warn!(
                    "Content {} was deleted but is defined upstream in module {}",
                    root,
                    self.modules[module].name
                );
            }
        }

        if let Some((module, root)) = self.covering_source(path) {
            if root != *path && self.is_local(module) {
                self.regenerate.insert((module, root));
            }
        }
    }

    /// Exports every marked content source again from the live tree.
    pub(super) fn regenerate(&mut self) -> Result<(), ExportError> {
        let targets = std::mem::take(&mut self.regenerate);
        if targets.is_empty() {
            return Ok(());
        }

        let roots: BTreeSet<NodePath> = self
            .content_roots()
            .into_iter()
            .map(|(_, root)| root)
            .collect();

        for (module, root) in targets {
            self.check_interrupt()?;

            let nested: BTreeSet<NodePath> = roots
                .iter()
                .filter(|candidate| candidate.is_descendant_of(&root))
                .cloned()
                .collect();

            let exported = self.exporter().export_content(&root, &nested)?;

            let Some(source) = self.modules[module].content_source_for_root_mut(&root) else {
                continue;
            };

            match exported {
                Some(mut node) => {
                    log::trace!("Regenerated content source {}", source.path);

                    node.order_before = source.definition.root.order_before.clone();
                    source.definition.root = node;
                }
                None => {
                    log::debug!("Content {} is gone, removing its source", root);
                    self.modules[module].remove_content_source(&root);
                }
            }
        }

        Ok(())
    }
}
