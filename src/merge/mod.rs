//! Folds what the exporter found back into the local modules, so that the
//! model they build matches the live tree again.
//!
//! A merge works on a copy of the baseline's modules and rebuilds the model
//! from that copy whenever a step needs to see the effect of the previous
//! one. The baseline itself is never touched; a failed merge simply drops
//! the copy.

mod config;
mod content;
mod property;
mod reorder;
mod routing;

pub use routing::ModuleRouter;

use std::{
    collections::BTreeSet,
    sync::atomic::{AtomicBool, Ordering},
};

use crate::{
    category::CategoryClassifier,
    change_batch::ChangeBatch,
    content::ContentTree,
    error::{ErrorDisplay, ExportError},
    export::TreeExporter,
    location_mapper::LocationMapper,
    model::{
        ConfigDefinition, ConfigurationModel, Definition, DefinitionId, DefinitionNode,
        DefinitionRef, Module,
    },
    path::NodePath,
    path_pattern::PatternSet,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceKind {
    Config,
    Content,
}

/// Names one source file of a module.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceRef {
    pub module: String,
    pub kind: SourceKind,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct MergeResult {
    /// The local modules after the merge, in dependency order.
    pub modules: Vec<Module>,

    /// The model built from every module, upstream ones included.
    pub model: ConfigurationModel,

    pub changed_sources: Vec<SourceRef>,
    pub removed_sources: Vec<SourceRef>,
}

impl MergeResult {
    pub fn is_unchanged(&self) -> bool {
        self.changed_sources.is_empty() && self.removed_sources.is_empty()
    }
}

pub struct DefinitionMergeService<'a> {
    tree: &'a dyn ContentTree,
    classifier: &'a dyn CategoryClassifier,
    excluded: &'a PatternSet,
    router: &'a ModuleRouter,
    mapper: LocationMapper,
}

impl<'a> DefinitionMergeService<'a> {
    pub fn new(
        tree: &'a dyn ContentTree,
        classifier: &'a dyn CategoryClassifier,
        excluded: &'a PatternSet,
        router: &'a ModuleRouter,
        mapper: LocationMapper,
    ) -> Self {
        Self {
            tree,
            classifier,
            excluded,
            router,
            mapper,
        }
    }

    /// Merges everything in `batch` into a copy of the modules behind
    /// `baseline`. `interrupt` is checked between paths.
    pub fn merge(
        &self,
        baseline: &ConfigurationModel,
        batch: &ChangeBatch,
        interrupt: &AtomicBool,
    ) -> Result<MergeResult, ExportError> {
        let mut context = MergeContext {
            service: self,
            interrupt,
            modules: baseline.modules().to_vec(),
            model: baseline.clone(),
            reorder: BTreeSet::new(),
            regenerate: BTreeSet::new(),
            discovered: BTreeSet::new(),
        };

        if !batch.namespaces.is_empty() {
            for prefix in &batch.namespaces {
                context.check_interrupt()?;
                context.merge_namespace(prefix)?;
            }
            context.rebuild()?;
        }

        let config_paths: BTreeSet<&NodePath> = batch
            .config
            .added()
            .iter()
            .chain(batch.config.changed())
            .chain(batch.config.deleted())
            .collect();

        for path in config_paths {
            context.check_interrupt()?;
            context.merge_path(path)?;
        }

        context.merge_content(&batch.content)?;
        context.reorder()?;
        context.regenerate()?;

        context.finish(baseline)
    }
}

/// Where a definition node lives: which module, which definition, and the
/// path of the node inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Locator {
    module: usize,
    definition: DefinitionId,
    path: NodePath,
}

impl From<&DefinitionRef> for Locator {
    fn from(reference: &DefinitionRef) -> Self {
        Self {
            module: reference.module,
            definition: reference.definition,
            path: reference.path.clone(),
        }
    }
}

/// Working state of one merge.
struct MergeContext<'s, 'a> {
    service: &'s DefinitionMergeService<'a>,
    interrupt: &'s AtomicBool,

    /// Every module, upstream ones included, so indices match the model.
    modules: Vec<Module>,

    /// Built from `modules` at the last [`MergeContext::rebuild`].
    model: ConfigurationModel,

    /// Parents whose children may need new order hints.
    reorder: BTreeSet<NodePath>,

    /// Content sources to export again, by module and root.
    regenerate: BTreeSet<(usize, NodePath)>,

    /// Content roots found below config nodes while exporting.
    discovered: BTreeSet<NodePath>,
}

impl<'s, 'a> MergeContext<'s, 'a> {
    fn check_interrupt(&self) -> Result<(), ExportError> {
        if self.interrupt.load(Ordering::SeqCst) {
            Err(ExportError::Interrupted)
        } else {
            Ok(())
        }
    }

    fn exporter(&self) -> TreeExporter<'_> {
        TreeExporter::new(
            self.service.tree,
            &self.model,
            self.service.classifier,
            self.service.excluded,
        )
    }

    fn mapper(&self) -> &LocationMapper {
        &self.service.mapper
    }

    fn rebuild(&mut self) -> Result<(), ExportError> {
        self.model = ConfigurationModel::build(self.modules.clone())?;
        Ok(())
    }

    fn is_local(&self, module: usize) -> bool {
        self.modules
            .get(module)
            .map(Module::is_exported)
            .unwrap_or(false)
    }

    fn route_module(&self, path: &NodePath) -> Result<usize, ExportError> {
        self.service.router.route(path, &self.model)
    }

    fn merge_path(&mut self, path: &NodePath) -> Result<(), ExportError> {
        let diff = match self.exporter().export_delta(path) {
            Ok(Some(diff)) => diff,
            Ok(None) => return Ok(()),
            Err(error) if error.is_path_local() => {
                log::warn!("Skipping {}: {}", path, ErrorDisplay(error));
                return Ok(());
            }
            Err(error) => return Err(error),
        };

        self.discovered.extend(diff.content_roots.iter().cloned());

        if diff.root.is_empty() {
            return Ok(());
        }

        log::debug!("Merging diff rooted at {}", diff.root.path);

        let modules = self.modules.clone();
        let reorder = self.reorder.clone();

        match self.merge_config(&diff.root).and_then(|()| self.rebuild()) {
            Err(error) if error.is_path_local() => {
                log::warn!("Skipping {}: {}", path, ErrorDisplay(error));

                self.modules = modules;
                self.reorder = reorder;
                self.rebuild()
            }
            other => other,
        }
    }

    /// The local contributions to a node, oldest first.
    fn local_refs(&self, path: &NodePath) -> Vec<DefinitionRef> {
        self.model
            .node(path)
            .map(|node| {
                node.definitions
                    .iter()
                    .filter(|reference| self.is_local(reference.module))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The last local contribution to `path` that still exists in the
    /// working modules, optionally limited to one module.
    fn last_local(&mut self, path: &NodePath, module: Option<usize>) -> Option<Locator> {
        let candidates: Vec<Locator> = self
            .local_refs(path)
            .iter()
            .rev()
            .filter(|reference| module.map_or(true, |module| reference.module == module))
            .map(Locator::from)
            .collect();

        candidates
            .into_iter()
            .find(|locator| self.node_at(locator).is_some())
    }

    fn node_at(&mut self, locator: &Locator) -> Option<&mut DefinitionNode> {
        self.modules
            .get_mut(locator.module)?
            .config_definition_mut(locator.definition)?
            .root
            .find_mut(&locator.path)
    }

    /// Adds a config definition to the source the location mapper picks for
    /// its root.
    fn create_definition(&mut self, module: usize, root: DefinitionNode) -> Locator {
        let file = self.mapper().route(&root.path, true).file;
        let path = root.path.clone();
        let definition = ConfigDefinition::new(root);
        let id = definition.id;

        log::debug!(
            "Creating definition for {} in {} of module {}",
            path,
            file,
            self.modules[module].name
        );

        self.modules[module]
            .config_source_or_insert(&file)
            .definitions
            .push(Definition::Config(definition));

        Locator {
            module,
            definition: id,
            path,
        }
    }

    /// A local definition node for an existing node at `path` that new
    /// properties or hints can be written to, created if there is none.
    ///
    /// New nodes nest inside the parent's local definition when the parent
    /// has one in the routed module and `path` does not start its own
    /// definition.
    fn host_for(&mut self, path: &NodePath) -> Result<Locator, ExportError> {
        if let Some(locator) = self.last_local(path, None) {
            return Ok(locator);
        }

        let module = self.route_module(path)?;

        if let (Some(parent), Some(name)) = (path.parent(), path.name().cloned()) {
            if !self.mapper().should_start_definition(path) {
                if let Some(parent_locator) = self.last_local(&parent, Some(module)) {
                    if let Some(parent_node) = self.node_at(&parent_locator) {
                        if parent_node.node(&name).is_none() {
                            parent_node.nodes.push(DefinitionNode::new(path.clone()));
                        }

                        return Ok(Locator {
                            path: path.clone(),
                            ..parent_locator
                        });
                    }
                }
            }
        }

        Ok(self.create_definition(module, DefinitionNode::new(path.clone())))
    }

    /// Removes a definition node: the whole definition when the node is its
    /// root, else just the nested node.
    fn remove_definition_node(&mut self, locator: &Locator) {
        let Some(module) = self.modules.get_mut(locator.module) else {
            return;
        };

        let Some(definition) = module.config_definition_mut(locator.definition) else {
            return;
        };

        if definition.root.path == locator.path {
            module.remove_definition(locator.definition);
        } else {
            definition.root.remove_descendant(&locator.path);
        }
    }

    /// Returns the merged modules and the model they build.
    fn finish(mut self, baseline: &ConfigurationModel) -> Result<MergeResult, ExportError> {
        for module in &mut self.modules {
            if module.is_exported() {
                module.rebuild();
            }
        }

        let model = ConfigurationModel::build(self.modules.clone())?;

        let before: Vec<&Module> = baseline
            .modules()
            .iter()
            .filter(|module| module.is_exported())
            .collect();
        let after: Vec<Module> = self
            .modules
            .into_iter()
            .filter(Module::is_exported)
            .collect();

        let mut changed_sources = Vec::new();
        let mut removed_sources = Vec::new();
        for module in &after {
            let previous = before.iter().find(|candidate| candidate.name == module.name);
            source_changes(previous.copied(), module, &mut changed_sources, &mut removed_sources);
        }

        log::debug!(
            "Merge changed {} and removed {} sources",
            changed_sources.len(),
            removed_sources.len()
        );

        Ok(MergeResult {
            modules: after,
            model,
            changed_sources,
            removed_sources,
        })
    }
}

fn source_changes(
    before: Option<&Module>,
    after: &Module,
    changed: &mut Vec<SourceRef>,
    removed: &mut Vec<SourceRef>,
) {
    let source_ref = |kind, path: &str| SourceRef {
        module: after.name.clone(),
        kind,
        path: path.to_owned(),
    };

    for source in &after.config_sources {
        if before.and_then(|module| module.config_source(&source.path)) != Some(source) {
            changed.push(source_ref(SourceKind::Config, &source.path));
        }
    }

    for source in &after.content_sources {
        if before.and_then(|module| module.content_source(&source.path)) != Some(source) {
            changed.push(source_ref(SourceKind::Content, &source.path));
        }
    }

    let Some(before) = before else {
        return;
    };

    for source in &before.config_sources {
        if after.config_source(&source.path).is_none() {
            removed.push(source_ref(SourceKind::Config, &source.path));
        }
    }

    for source in &before.content_sources {
        if after.content_source(&source.path).is_none() {
            removed.push(source_ref(SourceKind::Content, &source.path));
        }
    }
}
