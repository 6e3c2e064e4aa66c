//! Defines how modules are applied, in order, to produce a
//! [`ConfigurationModel`].

use crate::{
    error::ModelError,
    path::{NodePath, Segment},
};

use super::{
    configuration::{
        append, ConfigurationModel, ConfigurationNode, ConfigurationProperty, ContentEntry,
        DefinitionRef, NamespaceEntry, PropertyContribution,
    },
    definition::{
        Definition, DefinitionId, DefinitionNode, DefinitionProperty, Module, NamespaceDefinition,
        PropertyOperation,
    },
    value::PRIMARY_TYPE,
};

impl ConfigurationModel {
    /// Applies every module in order. Within a module, namespaces come first,
    /// then config definitions sorted by root path so that parents always
    /// exist before the definitions below them. Content definitions are
    /// recorded last.
    pub fn build(modules: Vec<Module>) -> Result<Self, ModelError> {
        let mut model = ConfigurationModel::empty();
        let mut context = BuildContext::default();

        for (index, module) in modules.iter().enumerate() {
            let mut configs = Vec::new();

            for source in &module.config_sources {
                for definition in &source.definitions {
                    let origin = Origin {
                        module: index,
                        source: &source.path,
                        definition: definition.id(),
                    };

                    match definition {
                        Definition::Namespace(namespace) => {
                            apply_namespace(&mut model, &mut context, &origin, namespace)
                        }
                        Definition::Config(config) => configs.push((origin, &config.root)),
                    }
                }
            }

            // Stable, so definitions of the same path keep their source order.
            configs.sort_by(|(_, a), (_, b)| a.path.cmp(&b.path));

            for (origin, root) in &configs {
                apply_node(&mut model, &mut context, origin, root)?;
            }
        }

        apply_deferred_order(&mut model, context.deferred_order);

        for (index, module) in modules.iter().enumerate() {
            for source in &module.content_sources {
                context.apply_order += 1;

                model.content.push(ContentEntry {
                    root: source.root_path().clone(),
                    module: index,
                    source: source.path.clone(),
                    definition: source.definition.id,
                    order_before: source.definition.root.order_before.clone(),
                    apply_order: context.apply_order,
                });
            }
        }

        model.modules = modules;

        Ok(model)
    }
}

#[derive(Default)]
struct BuildContext {
    apply_order: u64,

    /// Order hints naming a sibling that did not exist yet when they were
    /// applied. They get another chance once everything else is in place.
    deferred_order: Vec<(NodePath, String)>,
}

impl BuildContext {
    fn reference(&mut self, origin: &Origin, path: &NodePath) -> DefinitionRef {
        self.apply_order += 1;

        DefinitionRef {
            module: origin.module,
            source: origin.source.to_owned(),
            definition: origin.definition,
            path: path.clone(),
            apply_order: self.apply_order,
        }
    }
}

struct Origin<'a> {
    module: usize,
    source: &'a str,
    definition: DefinitionId,
}

fn apply_namespace(
    model: &mut ConfigurationModel,
    context: &mut BuildContext,
    origin: &Origin,
    namespace: &NamespaceDefinition,
) {
    let reference = context.reference(origin, &NodePath::root());

    let entry = model
        .namespaces
        .entry(namespace.prefix.clone())
        .or_insert_with(|| NamespaceEntry {
            prefix: namespace.prefix.clone(),
            uri: namespace.uri.clone(),
            cnd: None,
            definitions: Vec::new(),
        });

    entry.uri = namespace.uri.clone();
    if namespace.cnd.is_some() {
        entry.cnd = namespace.cnd.clone();
    }
    entry.definitions.push(reference);
}

fn apply_node(
    model: &mut ConfigurationModel,
    context: &mut BuildContext,
    origin: &Origin,
    node: &DefinitionNode,
) -> Result<(), ModelError> {
    let path = &node.path;
    let reference = context.reference(origin, path);

    // Anything nested inside a delete is ignored.
    if node.delete {
        delete_node(model, reference);
        return Ok(());
    }

    if !model.nodes.contains_key(path) {
        create_node(model, node)?;
    }

    if let Some(config_node) = model.nodes.get_mut(path) {
        config_node.definitions.push(reference.clone());

        if node.residual_child_category.is_some() {
            config_node.residual_child_category = node.residual_child_category;
        }

        if let Some(ignore) = node.ignore_reordered_children {
            config_node.ignore_reordered_children = ignore;
        }
    }

    for property in &node.properties {
        apply_property(model, path, property, &reference)?;
    }

    if let Some(before) = &node.order_before {
        if !order_before(model, path, before) {
            context
                .deferred_order
                .push((path.clone(), before.clone()));
        }
    }

    for child in &node.nodes {
        apply_node(model, context, origin, child)?;
    }

    Ok(())
}

fn create_node(model: &mut ConfigurationModel, node: &DefinitionNode) -> Result<(), ModelError> {
    let path = &node.path;

    let (Some(parent), Some(name)) = (path.parent(), path.name()) else {
        return Ok(());
    };

    if !model.nodes.contains_key(&parent) {
        return Err(ModelError::MissingParent { path: path.clone() });
    }

    let declares_type = node
        .property(PRIMARY_TYPE)
        .map(|property| property.operation != PropertyOperation::Delete)
        .unwrap_or(false);
    if !declares_type {
        return Err(ModelError::MissingPrimaryType { path: path.clone() });
    }

    if model.deleted_nodes.remove(path).is_some() {
        log::trace!("Definition revives deleted node {}", path);
    }

    if let Some(parent_node) = model.nodes.get_mut(&parent) {
        parent_node.children.push(name.clone());
    }

    model
        .nodes
        .insert(path.clone(), ConfigurationNode::new(path.clone()));

    Ok(())
}

fn delete_node(model: &mut ConfigurationModel, reference: DefinitionRef) {
    let path = reference.path.clone();

    if path.is_root() {
        log::warn!("Ignoring a definition that deletes the root node");
        return;
    }

    if !model.nodes.contains_key(&path) {
        match model.deleted_nodes.get_mut(&path) {
            Some(record) => record.definitions.push(reference),
            None => {
                log::debug!("Definition deletes {}, which does not exist", path);

                let mut record = ConfigurationNode::new(path.clone());
                record.definitions.push(reference);
                model.deleted_nodes.insert(path, record);
            }
        }

        return;
    }

    let removed: Vec<NodePath> = model.subtree(&path).map(|node| node.path.clone()).collect();
    for removed_path in removed {
        if let Some(node) = model.nodes.remove(&removed_path) {
            model.deleted_nodes.insert(removed_path, node);
        }
    }

    if let Some(record) = model.deleted_nodes.get_mut(&path) {
        record.definitions.push(reference);
    }

    if let (Some(parent), Some(name)) = (path.parent(), path.name()) {
        if let Some(parent_node) = model.nodes.get_mut(&parent) {
            parent_node.children.retain(|child| child != name);
        }
    }
}

fn apply_property(
    model: &mut ConfigurationModel,
    node_path: &NodePath,
    property: &DefinitionProperty,
    reference: &DefinitionRef,
) -> Result<(), ModelError> {
    let property_path = node_path.join(Segment::new(property.name.as_str()));

    let Some(node) = model.nodes.get_mut(node_path) else {
        return Err(ModelError::MissingParent {
            path: property_path,
        });
    };

    let contribution = PropertyContribution {
        reference: reference.clone(),
        operation: property.operation,
        value: property.value.clone(),
    };

    if property.operation == PropertyOperation::Delete {
        if let Some(mut existing) = node.properties.remove(&property.name) {
            existing.definitions.push(contribution);
            model.deleted_properties.insert(property_path, existing);
        } else if let Some(record) = model.deleted_properties.get_mut(&property_path) {
            record.definitions.push(contribution);
        } else {
            log::debug!(
                "Definition deletes property {}, which does not exist",
                property_path
            );
        }

        return Ok(());
    }

    let Some(value) = &property.value else {
        return Err(ModelError::MissingValue {
            path: property_path,
        });
    };

    match node.properties.get_mut(&property.name) {
        Some(existing) => {
            match property.operation {
                PropertyOperation::Replace => {
                    if existing.value.shape_differs(value) {
                        return Err(ModelError::TypeMismatch {
                            path: property_path,
                        });
                    }
                    existing.value = value.clone();
                }
                PropertyOperation::Add => {
                    if !existing.value.is_multiple() || existing.value.shape_differs(value) {
                        return Err(ModelError::InvalidAdd {
                            path: property_path,
                        });
                    }
                    existing.value = append(Some(existing.value.clone()), value);
                }
                _ => existing.value = value.clone(),
            }

            existing.definitions.push(contribution);
        }
        None => {
            let mut definitions = model
                .deleted_properties
                .remove(&property_path)
                .map(|record| record.definitions)
                .unwrap_or_default();
            definitions.push(contribution);

            node.properties.insert(
                property.name.clone(),
                ConfigurationProperty {
                    name: property.name.clone(),
                    value: value.clone(),
                    definitions,
                },
            );
        }
    }

    Ok(())
}

/// Moves the node at `path` before the sibling named `before`, or first if
/// `before` is empty. Returns false if the sibling does not exist.
fn order_before(model: &mut ConfigurationModel, path: &NodePath, before: &str) -> bool {
    let (Some(parent), Some(name)) = (path.parent(), path.name()) else {
        return true;
    };

    let Some(parent_node) = model.nodes.get_mut(&parent) else {
        return true;
    };
    let children = &mut parent_node.children;

    let Some(current) = children.iter().position(|child| child == name) else {
        return true;
    };

    if before.is_empty() {
        let child = children.remove(current);
        children.insert(0, child);
        return true;
    }

    let before = match Segment::parse(before) {
        Ok(before) => before,
        Err(err) => {
            log::warn!("Ignoring order hint on {}: {}", path, err);
            return true;
        }
    };

    if &before == name {
        return true;
    }

    let child = children.remove(current);
    match children.iter().position(|sibling| *sibling == before) {
        Some(index) => {
            children.insert(index, child);
            true
        }
        None => {
            children.insert(current, child);
            false
        }
    }
}

fn apply_deferred_order(model: &mut ConfigurationModel, deferred: Vec<(NodePath, String)>) {
    for (path, before) in deferred {
        if !order_before(model, &path, &before) {
            log::warn!(
                "Ignoring order hint on {}: sibling '{}' does not exist",
                path,
                before
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::model::{ConfigDefinition, ConfigSource, PropertyValue, Value, ValueType};

    fn path(source: &str) -> NodePath {
        NodePath::parse(source).unwrap()
    }

    fn typed(source: &str) -> DefinitionNode {
        let mut node = DefinitionNode::new(path(source));
        node.set_value(PRIMARY_TYPE, PropertyValue::single(Value::Name("nt:unstructured".into())));
        node
    }

    fn module(name: &str, exported: bool, roots: Vec<DefinitionNode>) -> Module {
        let mut module = if exported {
            Module::exported(name, name)
        } else {
            Module::new(name)
        };

        module.config_sources.push(ConfigSource::new(
            "main.json",
            roots
                .into_iter()
                .map(|root| Definition::Config(ConfigDefinition::new(root)))
                .collect(),
        ));
        module
    }

    fn children(model: &ConfigurationModel, source: &str) -> Vec<String> {
        model
            .node(&path(source))
            .unwrap()
            .children
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn nested_nodes_are_created_in_order() {
        let mut a = typed("/a");
        a.nodes.push(typed("/a/x"));
        a.nodes.push(typed("/a/y"));

        let model = ConfigurationModel::build(vec![module("base", false, vec![a])]).unwrap();

        assert_eq!(children(&model, "/"), vec!["a"]);
        assert_eq!(children(&model, "/a"), vec!["x", "y"]);
        assert_eq!(model.node(&path("/a/x")).unwrap().definitions.len(), 1);
    }

    #[test]
    fn creating_requires_parent_and_type() {
        let orphan = ConfigurationModel::build(vec![module("base", false, vec![typed("/a/b")])]);
        assert_eq!(
            orphan.unwrap_err(),
            ModelError::MissingParent { path: path("/a/b") }
        );

        let untyped = ConfigurationModel::build(vec![module(
            "base",
            false,
            vec![DefinitionNode::new(path("/a"))],
        )]);
        assert_eq!(
            untyped.unwrap_err(),
            ModelError::MissingPrimaryType { path: path("/a") }
        );
    }

    #[test]
    fn later_modules_modify_and_record_contributions() {
        let mut base = typed("/a");
        base.set_value("title", PropertyValue::single("one"));

        let mut local = DefinitionNode::new(path("/a"));
        local.set_value("title", PropertyValue::single("two"));

        let model = ConfigurationModel::build(vec![
            module("base", false, vec![base]),
            module("site", true, vec![local]),
        ])
        .unwrap();

        let title = model.property(&path("/a/title")).unwrap();
        assert_eq!(title.value, PropertyValue::single("two"));
        assert_eq!(title.definitions.len(), 2);
        assert_eq!(title.definitions[1].reference.module, 1);
        assert!(model.is_exported(1));
        assert!(!model.is_exported(0));
    }

    #[test]
    fn replace_with_new_shape_is_rejected() {
        let mut base = typed("/a");
        base.set_value("count", PropertyValue::single("one"));

        let mut local = DefinitionNode::new(path("/a"));
        local.set_value("count", PropertyValue::single(1i64));

        let result = ConfigurationModel::build(vec![
            module("base", false, vec![base]),
            module("site", true, vec![local.clone()]),
        ]);
        assert_eq!(
            result.unwrap_err(),
            ModelError::TypeMismatch {
                path: path("/a/count")
            }
        );

        local.properties[0].operation = PropertyOperation::Override;
        let mut base = typed("/a");
        base.set_value("count", PropertyValue::single("one"));
        let model = ConfigurationModel::build(vec![
            module("base", false, vec![base]),
            module("site", true, vec![local]),
        ])
        .unwrap();
        assert_eq!(
            model.property(&path("/a/count")).unwrap().value,
            PropertyValue::single(1i64)
        );
    }

    #[test]
    fn add_appends_to_lists() {
        let list = |values: &[&str]| {
            PropertyValue::multiple(
                ValueType::String,
                values.iter().map(|value| Value::from(*value)).collect(),
            )
        };

        let mut base = typed("/a");
        base.set_value("tags", list(&["a"]));

        let mut local = DefinitionNode::new(path("/a"));
        local.set_property(DefinitionProperty::new(
            "tags",
            PropertyOperation::Add,
            list(&["b"]),
        ));

        let model = ConfigurationModel::build(vec![
            module("base", false, vec![base]),
            module("site", true, vec![local]),
        ])
        .unwrap();

        assert_eq!(model.property(&path("/a/tags")).unwrap().value, list(&["a", "b"]));
    }

    #[test]
    fn deletes_are_remembered() {
        let mut base = typed("/a");
        base.set_value("title", PropertyValue::single("one"));
        base.nodes.push(typed("/a/b"));
        base.nodes[0].nodes.push(typed("/a/b/c"));

        let mut local = DefinitionNode::new(path("/a"));
        local.set_property(DefinitionProperty::delete("title"));
        local.nodes.push(DefinitionNode::delete_stub(path("/a/b")));

        let model = ConfigurationModel::build(vec![
            module("base", false, vec![base]),
            module("site", true, vec![local]),
        ])
        .unwrap();

        assert!(model.node(&path("/a/b")).is_none());
        assert!(model.node(&path("/a/b/c")).is_none());
        assert!(children(&model, "/a").is_empty());

        let deleted = model.deleted_node(&path("/a/b")).unwrap();
        assert_eq!(deleted.definitions.len(), 2);
        assert!(model.deleted_node(&path("/a/b/c")).is_some());

        assert!(model.property(&path("/a/title")).is_none());
        let record = model.deleted_property(&path("/a/title")).unwrap();
        assert_eq!(record.definitions.len(), 2);
    }

    #[test]
    fn recreated_property_keeps_history() {
        let mut base = typed("/a");
        base.set_value("title", PropertyValue::single("one"));

        let mut middle = DefinitionNode::new(path("/a"));
        middle.set_property(DefinitionProperty::delete("title"));

        let mut local = DefinitionNode::new(path("/a"));
        local.set_value("title", PropertyValue::single("two"));

        let model = ConfigurationModel::build(vec![
            module("base", false, vec![base]),
            module("middle", false, vec![middle]),
            module("site", true, vec![local]),
        ])
        .unwrap();

        let title = model.property(&path("/a/title")).unwrap();
        assert_eq!(title.definitions.len(), 3);
        assert!(model.deleted_property(&path("/a/title")).is_none());
    }

    #[test]
    fn order_before_moves_siblings() {
        let mut a = typed("/a");
        a.nodes.push(typed("/a/x"));
        a.nodes.push(typed("/a/y"));
        a.nodes.push(typed("/a/z"));

        let mut local = DefinitionNode::new(path("/a"));
        let mut z = DefinitionNode::new(path("/a/z"));
        z.order_before = Some("x".to_owned());
        let mut y = DefinitionNode::new(path("/a/y"));
        y.order_before = Some(String::new());
        local.nodes.push(z);
        local.nodes.push(y);

        let model = ConfigurationModel::build(vec![
            module("base", false, vec![a]),
            module("site", true, vec![local]),
        ])
        .unwrap();

        assert_eq!(children(&model, "/a"), vec!["y", "z", "x"]);
    }

    #[test]
    fn order_before_a_later_sibling_is_deferred() {
        let mut a = typed("/a");
        let mut x = typed("/a/x");
        x.order_before = Some("w".to_owned());
        a.nodes.push(x);
        a.nodes.push(typed("/a/y"));

        let mut site = DefinitionNode::new(path("/a"));
        site.nodes.push(typed("/a/w"));

        let model = ConfigurationModel::build(vec![
            module("base", false, vec![a]),
            module("site", true, vec![site]),
        ])
        .unwrap();

        assert_eq!(children(&model, "/a"), vec!["y", "x", "w"]);
    }

    #[test]
    fn definitions_apply_parents_first() {
        let mut module = Module::exported("site", "site");
        module.config_sources.push(ConfigSource::new(
            "a.json",
            vec![Definition::Config(ConfigDefinition::new(typed("/x/y")))],
        ));
        module.config_sources.push(ConfigSource::new(
            "b.json",
            vec![Definition::Config(ConfigDefinition::new(typed("/x")))],
        ));

        let model = ConfigurationModel::build(vec![module]).unwrap();

        assert_eq!(children(&model, "/x"), vec!["y"]);
    }

    #[test]
    fn content_roots_are_recorded() {
        let mut site = module("site", true, vec![typed("/content")]);
        site.add_content_source("news.json", typed("/content/news"));

        let model = ConfigurationModel::build(vec![site]).unwrap();

        assert_eq!(model.content_entries().len(), 1);
        assert!(model.is_content_path(&path("/content/news/2024")));
        assert!(!model.is_content_path(&path("/content")));
        assert_eq!(
            model.child_order(&path("/content")),
            vec![Segment::new("news")]
        );
    }
}
