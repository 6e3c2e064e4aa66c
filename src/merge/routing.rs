//! Picks the module that new definitions for a path are written to.

use crate::{
    error::{ConfigError, ExportError},
    model::ConfigurationModel,
    path::NodePath,
};

/// Path prefix to module name mappings, kept most specific first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRouter {
    rules: Vec<(NodePath, String)>,
}

impl ModuleRouter {
    pub fn new(rules: impl IntoIterator<Item = (NodePath, String)>) -> Self {
        let mut rules: Vec<_> = rules.into_iter().collect();
        rules.sort_by(|(a, _), (b, _)| b.depth().cmp(&a.depth()).then_with(|| a.cmp(b)));

        Self { rules }
    }

    pub fn rules(&self) -> impl Iterator<Item = (&NodePath, &str)> {
        self.rules.iter().map(|(path, name)| (path, name.as_str()))
    }

    /// The module named by the most specific rule covering `path`.
    pub fn mapped_module(&self, path: &NodePath) -> Option<&str> {
        self.rules
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix))
            .map(|(_, name)| name.as_str())
    }

    /// The index, in `model`, of the module that should hold new definitions
    /// for `path`.
    ///
    /// The configured mapping decides unless the parent already lives in a
    /// local module further downstream, in which case the subtree stays with
    /// its parent.
    pub fn route(&self, path: &NodePath, model: &ConfigurationModel) -> Result<usize, ExportError> {
        let name = self.mapped_module(path).ok_or(ConfigError::NoRootModule)?;

        let mapped = model
            .module_index(name)
            .filter(|&index| model.is_exported(index))
            .ok_or_else(|| ConfigError::UnknownModule {
                name: name.to_owned(),
                path: path.clone(),
            })?;

        let inherited = path
            .parent()
            .and_then(|parent| parent_module(&parent, model));

        let module = match inherited {
            Some(index) if index > mapped => index,
            _ => mapped,
        };

        log::trace!("Routed {} to module {}", path, model.modules()[module].name);

        Ok(module)
    }
}

/// The local module owning `parent`: the one that introduced it if that is
/// local, else the last local module contributing to it.
fn parent_module(parent: &NodePath, model: &ConfigurationModel) -> Option<usize> {
    let node = model.node(parent)?;
    let introduced = node.definitions.first()?;

    if model.is_exported(introduced.module) {
        return Some(introduced.module);
    }

    node.definitions
        .iter()
        .rev()
        .find(|reference| model.is_exported(reference.module))
        .map(|reference| reference.module)
}
