//! Order hints for parents whose children were added, restored or moved.
//!
//! The pass works against the rebuilt model rather than the diff: after the
//! other merge steps it asks what order the definitions now produce, and
//! writes one hint at a time on a local definition until that order matches
//! the live one.

use crate::{
    error::ExportError,
    export::ordering::{align, first_move},
    path::{NodePath, Segment},
};

use super::{Locator, MergeContext};

impl MergeContext<'_, '_> {
    pub(super) fn reorder(&mut self) -> Result<(), ExportError> {
        let parents = std::mem::take(&mut self.reorder);

        for parent in &parents {
            self.check_interrupt()?;
            self.rebuild()?;
            self.reorder_children(parent)?;
        }

        if !parents.is_empty() {
            self.rebuild()?;
        }

        Ok(())
    }

    fn reorder_children(&mut self, parent: &NodePath) -> Result<(), ExportError> {
        let Some(live) = self.service.tree.get_node(parent)? else {
            return Ok(());
        };
        let Some(node) = self.model.node(parent) else {
            return Ok(());
        };

        if !live.orderable_children || node.ignore_reordered_children {
            return Ok(());
        }

        let expected = self.exporter().expected_order(parent, &live);

        if self.clear_hints(parent, |before| is_stale(before, &expected)) {
            self.rebuild()?;
        }

        // Hints written by earlier exports replay after any new one, so once
        // the order drifts every local hint below this parent is recomputed.
        let (current, target) = align(&self.model.child_order(parent), &expected);
        if current != target && self.clear_hints(parent, |_| true) {
            log::trace!("Recomputing the order hints below {}", parent);
            self.rebuild()?;
        }

        // Every round fixes at least the first misplaced child unless an
        // upstream definition moves it back.
        for _ in 0..=expected.len() {
            let (current, target) = align(&self.model.child_order(parent), &expected);

            let Some((moved, before)) = first_move(&current, &target) else {
                return Ok(());
            };

            let next = target
                .iter()
                .skip_while(|name| **name != before)
                .nth(1)
                .cloned();

            let placed = self.place_hint(parent, &moved, Some(&before))?
                || self.place_hint(parent, &before, next.as_ref())?;

            if !placed {
                log::warn!(
                    "Cannot reproduce the order of {} below {}: no local definition can carry the order",
                    moved,
                    parent
                );
                return Ok(());
            }

            self.rebuild()?;
        }

        log::warn!(
            "Child order of {} still differs from the live order after reordering",
            parent
        );

        Ok(())
    }

    /// Drops the local hints on children of `parent` whose target matches
    /// `clear`. The empty target orders a child first.
    fn clear_hints(&mut self, parent: &NodePath, clear: impl Fn(&str) -> bool) -> bool {
        let is_cleared = |hint: &Option<String>| hint.as_deref().map_or(false, &clear);

        let children = self
            .model
            .node(parent)
            .map(|node| node.children.clone())
            .unwrap_or_default();

        let mut cleared = false;

        for child in children {
            let path = parent.join(child);
            let locators: Vec<Locator> = self.local_refs(&path).iter().map(Locator::from).collect();

            for locator in locators {
                if let Some(node) = self.node_at(&locator) {
                    if is_cleared(&node.order_before) {
                        node.order_before = None;
                        cleared = true;
                    }
                }
            }
        }

        for module in self.modules.iter_mut().filter(|module| module.is_exported()) {
            for source in &mut module.content_sources {
                let root = &mut source.definition.root;

                if root.path.parent().as_ref() == Some(parent) && is_cleared(&root.order_before) {
                    root.order_before = None;
                    cleared = true;
                }
            }
        }

        cleared
    }

    /// Writes a hint placing `name` before `before`, or at the end when
    /// `before` is `None`. Returns false when no local definition can
    /// express it.
    ///
    /// Config nodes are placed among config siblings only; content roots
    /// can be placed anywhere.
    fn place_hint(
        &mut self,
        parent: &NodePath,
        name: &Segment,
        before: Option<&Segment>,
    ) -> Result<bool, ExportError> {
        let path = parent.join(name.clone());

        if self.model.node(&path).is_some() {
            let Some(before) = before else {
                return Ok(false);
            };

            if self.model.node(&parent.join(before.clone())).is_none() {
                return Ok(false);
            }

            let locator = self.host_for(&path)?;
            let Some(node) = self.node_at(&locator) else {
                return Ok(false);
            };

            log::trace!("Ordering {} before {}", path, before);
            node.order_before = Some(before.to_string());
            return Ok(true);
        }

        let owner = self
            .modules
            .iter()
            .enumerate()
            .rev()
            .find(|(_, module)| {
                module.is_exported() && module.content_source_for_root(&path).is_some()
            })
            .map(|(index, _)| index);

        let Some(source) = owner
            .and_then(|index| self.modules[index].content_source_for_root_mut(&path))
        else {
            return Ok(false);
        };

        log::trace!("Ordering content {} before {:?}", path, before);
        source.definition.root.order_before = before.map(ToString::to_string);

        Ok(true)
    }
}

/// A hint naming a sibling that no longer exists.
fn is_stale(before: &str, expected: &[Segment]) -> bool {
    !before.is_empty() && !expected.iter().any(|name| name.to_string() == before)
}
