//! Sorting tree items into configuration, content, and system data.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError, model::ConfigurationModel, path::NodePath, path_pattern::PathPattern,
};

/// Properties that are maintained by the content store itself and never
/// belong in a configuration definition.
pub const PROTECTED_PROPERTIES: [&str; 3] = ["jcr:uuid", "jcr:created", "jcr:createdBy"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Structural data, exported as fine-grained definitions.
    Config,

    /// Bulk data, exported as opaque subtrees.
    Content,

    /// Never exported.
    System,
}

impl FromStr for Category {
    type Err = ();

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        match source.trim() {
            "config" => Ok(Category::Config),
            "content" => Ok(Category::Content),
            "system" => Ok(Category::System),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str(match self {
            Category::Config => "config",
            Category::Content => "content",
            Category::System => "system",
        })
    }
}

/// Decides which category a node or property belongs to, given the current
/// baseline.
pub trait CategoryClassifier {
    fn classify(&self, path: &NodePath, is_property: bool, model: &ConfigurationModel)
        -> Category;
}

/// A rule assigning a category to the residual (undeclared) children of every
/// node matching a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResidualCategoryRule {
    pub pattern: PathPattern,
    pub category: Category,
}

impl ResidualCategoryRule {
    /// Parses a rule of the form `<pattern>: <category>`. Patterns may contain
    /// colons themselves, so the category is split off at the last one.
    pub fn parse(rule: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidCategoryRule {
            rule: rule.to_owned(),
        };

        let (pattern, category) = rule.rsplit_once(':').ok_or_else(invalid)?;
        let category = category.parse().map_err(|_| invalid())?;
        let pattern = PathPattern::new(pattern.trim())?;

        Ok(Self { pattern, category })
    }
}

/// The default classifier: walks the baseline from the root, and decides on
/// the first path component the baseline does not know using the parent's
/// residual child category.
#[derive(Debug, Clone, Default)]
pub struct ModelCategoryClassifier {
    overrides: Vec<ResidualCategoryRule>,
    injections: Vec<ResidualCategoryRule>,
}

impl ModelCategoryClassifier {
    pub fn new(
        overrides: Vec<ResidualCategoryRule>,
        injections: Vec<ResidualCategoryRule>,
    ) -> Self {
        Self {
            overrides,
            injections,
        }
    }

    /// The category of children of `parent` that the baseline does not
    /// declare. Overrides beat the baseline, which beats injections.
    pub fn residual_category(&self, parent: &NodePath, model: &ConfigurationModel) -> Category {
        if let Some(category) = matching(&self.overrides, parent) {
            return category;
        }

        if let Some(category) = model
            .node(parent)
            .and_then(|node| node.residual_child_category)
        {
            return category;
        }

        matching(&self.injections, parent).unwrap_or(Category::Config)
    }

    fn classify_node(&self, path: &NodePath, model: &ConfigurationModel) -> Category {
        for depth in 1..=path.depth() {
            if model.node(&path.truncate(depth)).is_some() {
                continue;
            }

            let mut category = self.residual_category(&path.truncate(depth - 1), model);

            // Below the first unknown node there is nothing in the baseline,
            // but configured rules still apply.
            for deeper in depth + 1..=path.depth() {
                if category != Category::Config {
                    break;
                }

                let parent = path.truncate(deeper - 1);
                if let Some(rule) =
                    matching(&self.overrides, &parent).or_else(|| matching(&self.injections, &parent))
                {
                    category = rule;
                }
            }

            return category;
        }

        Category::Config
    }
}

fn matching(rules: &[ResidualCategoryRule], parent: &NodePath) -> Option<Category> {
    rules
        .iter()
        .find(|rule| rule.pattern.is_match(parent))
        .map(|rule| rule.category)
}

impl CategoryClassifier for ModelCategoryClassifier {
    fn classify(
        &self,
        path: &NodePath,
        is_property: bool,
        model: &ConfigurationModel,
    ) -> Category {
        if !is_property {
            return self.classify_node(path, model);
        }

        let (Some(node_path), Some(name)) = (path.parent(), path.name()) else {
            return Category::System;
        };

        let category = self.classify_node(&node_path, model);
        if category == Category::Config && PROTECTED_PROPERTIES.contains(&name.name()) {
            Category::System
        } else {
            category
        }
    }
}
