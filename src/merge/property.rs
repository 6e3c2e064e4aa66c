//! Writing changed properties back into definitions.
//!
//! The value a property should end up with is known from the live tree. What
//! the merge decides is where to write it and with which operation: the last
//! local definition of the property is rewritten when there is one, otherwise
//! a local definition node for the property's node is found or created.

use std::collections::BTreeSet;

use crate::{
    error::ExportError,
    model::{
        replay, DefinitionNode, DefinitionProperty, PropertyContribution, PropertyOperation,
        PropertyValue, MIXIN_TYPES, PRIMARY_TYPE,
    },
    path::{NodePath, Segment},
};

use super::{Locator, MergeContext};

impl MergeContext<'_, '_> {
    pub(super) fn merge_properties(&mut self, diff: &DefinitionNode) -> Result<(), ExportError> {
        let path = &diff.path;
        let mut host: Option<Locator> = None;

        for property in &diff.properties {
            let desired = match property.operation {
                PropertyOperation::Delete => None,
                _ => property.value.clone(),
            };

            let property_path = path.join(Segment::new(property.name.as_str()));
            let contributions: Vec<PropertyContribution> = self
                .model
                .property_history(&property_path)
                .map(|history| history.definitions.clone())
                .unwrap_or_default();

            if self.rewrite_local(&property_path, &property.name, desired.as_ref(), &contributions) {
                continue;
            }

            let current = replay(&contributions);
            if equivalent(&property.name, desired.as_ref(), current.as_ref()) {
                continue;
            }

            let written = resolve(&property.name, None, current.as_ref(), desired);

            let locator = match &host {
                Some(locator) => locator.clone(),
                None => {
                    let locator = self.host_for(path)?;
                    host = Some(locator.clone());
                    locator
                }
            };

            if let Some(node) = self.node_at(&locator) {
                log::trace!("Writing {} as {:?}", property_path, written.operation);
                node.set_property(written);
            }
        }

        Ok(())
    }

    /// Rewrites the last local contribution to a property. Returns false if
    /// there is none left in the working modules.
    fn rewrite_local(
        &mut self,
        property_path: &NodePath,
        name: &str,
        desired: Option<&PropertyValue>,
        contributions: &[PropertyContribution],
    ) -> bool {
        let Some(index) = contributions
            .iter()
            .rposition(|contribution| self.is_local(contribution.reference.module))
        else {
            return false;
        };

        if contributions[index + 1..]
            .iter()
            .any(|contribution| !self.is_local(contribution.reference.module))
        {
            log::warn!(
                "{} is defined upstream after its last local definition; \
                 the exported value may not take effect",
                property_path
            );
        }

        let local = &contributions[index];
        let before = replay(&contributions[..index]);
        let without = replay(
            contributions
                .iter()
                .enumerate()
                .filter(|(position, _)| *position != index)
                .map(|(_, contribution)| contribution),
        );

        let locator = Locator::from(&local.reference);
        let operation = local.operation;

        let Some(node) = self.node_at(&locator) else {
            return false;
        };

        if equivalent(name, desired, without.as_ref()) {
            log::trace!("Dropping redundant definition of {}", property_path);
            node.remove_property(name);
        } else {
            node.set_property(resolve(name, Some(operation), before.as_ref(), desired.cloned()));
        }

        true
    }
}

/// Whether two values mean the same thing. Type properties compare as sets of
/// names.
pub(super) fn equivalent(
    name: &str,
    a: Option<&PropertyValue>,
    b: Option<&PropertyValue>,
) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) if name == PRIMARY_TYPE || name == MIXIN_TYPES => {
            let a: BTreeSet<String> = a.strings().into_iter().collect();
            let b: BTreeSet<String> = b.strings().into_iter().collect();
            a == b
        }
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// The property definition that turns `before`, the value in place when the
/// definition applies, into `desired`.
///
/// An add stays an add while the live value is still `before` with more
/// values appended.
fn resolve(
    name: &str,
    local_operation: Option<PropertyOperation>,
    before: Option<&PropertyValue>,
    desired: Option<PropertyValue>,
) -> DefinitionProperty {
    let Some(value) = desired else {
        return DefinitionProperty::delete(name);
    };

    if local_operation == Some(PropertyOperation::Add) {
        if let Some(tail) = appended_tail(before, &value) {
            return DefinitionProperty::new(name, PropertyOperation::Add, tail);
        }
    }

    let operation = match before {
        Some(before) if before.shape_differs(&value) => PropertyOperation::Override,
        _ => PropertyOperation::Replace,
    };

    DefinitionProperty::new(name, operation, value)
}

fn appended_tail(before: Option<&PropertyValue>, value: &PropertyValue) -> Option<PropertyValue> {
    let (
        Some(PropertyValue::Multiple {
            value_type: before_type,
            values: prefix,
        }),
        PropertyValue::Multiple { value_type, values },
    ) = (before, value)
    else {
        return None;
    };

    if before_type != value_type || values.len() <= prefix.len() || !values.starts_with(prefix) {
        return None;
    }

    Some(PropertyValue::multiple(
        *value_type,
        values[prefix.len()..].to_vec(),
    ))
}
