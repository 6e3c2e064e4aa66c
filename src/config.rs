//! Export configuration: the file format and the validated form built from
//! it.

use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    category::{ModelCategoryClassifier, ResidualCategoryRule},
    collector::{BUILTIN_IGNORED, DEFAULT_IGNORE_USER_DATA},
    error::ConfigError,
    location_mapper::{LocationMapper, LocationRule},
    merge::ModuleRouter,
    model::Module,
    path::NodePath,
    path_pattern::PatternSet,
};

fn default_ignore_user_data() -> Option<String> {
    Some(DEFAULT_IGNORE_USER_DATA.to_owned())
}

fn default_min_quiescence_ms() -> u64 {
    250
}

fn default_tick_interval_ms() -> u64 {
    100
}

fn default_max_retries() -> usize {
    3
}

fn default_event_batch_size() -> usize {
    1000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocationRule {
    pub context: String,
    pub file: String,
}

/// The export configuration as it is written in a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceExportConfig {
    /// Path prefix to module name. `/` must be mapped.
    pub modules: BTreeMap<String, String>,

    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default = "default_ignore_user_data")]
    pub ignore_user_data: Option<String>,

    #[serde(default)]
    pub inject_residual_category: Vec<String>,

    #[serde(default)]
    pub override_residual_category: Vec<String>,

    #[serde(default)]
    pub location_rules: Vec<SourceLocationRule>,

    #[serde(default = "default_min_quiescence_ms")]
    pub min_quiescence_ms: u64,

    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_event_batch_size")]
    pub event_batch_size: usize,
}

impl SourceExportConfig {
    /// A configuration that sends everything to `module`.
    pub fn new(module: impl Into<String>) -> Self {
        let mut modules = BTreeMap::new();
        modules.insert("/".to_owned(), module.into());

        Self {
            modules,
            exclude: Vec::new(),
            ignore_user_data: default_ignore_user_data(),
            inject_residual_category: Vec::new(),
            override_residual_category: Vec::new(),
            location_rules: Vec::new(),
            min_quiescence_ms: default_min_quiescence_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            max_retries: default_max_retries(),
            event_batch_size: default_event_batch_size(),
        }
    }
}

/// The validated configuration the export runs with.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub router: ModuleRouter,

    /// The configured exclusions alone.
    pub exclude: PatternSet,

    /// Everything that is never exported: the built-in ignore set plus the
    /// configured exclusions.
    pub excluded: PatternSet,

    pub ignore_user_data: Option<String>,
    pub location_rules: Vec<LocationRule>,
    pub classifier: ModelCategoryClassifier,

    pub min_quiescence: Duration,
    pub tick_interval: Duration,
    pub max_retries: usize,
    pub event_batch_size: usize,
}

impl ExportConfig {
    pub fn load_from_slice(contents: &[u8]) -> Result<Self, ConfigError> {
        let source: SourceExportConfig = serde_json::from_slice(contents)?;
        Self::from_source(&source)
    }

    pub fn from_source(source: &SourceExportConfig) -> Result<Self, ConfigError> {
        let rules = source
            .modules
            .iter()
            .map(|(path, module)| NodePath::parse(path).map(|path| (path, module.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        if !rules.iter().any(|(path, _)| path.is_root()) {
            return Err(ConfigError::NoRootModule);
        }

        let exclude = PatternSet::from_patterns(&source.exclude)?;

        let mut excluded = PatternSet::from_patterns(BUILTIN_IGNORED)?;
        excluded.extend(&exclude);

        let location_rules: Vec<LocationRule> = source
            .location_rules
            .iter()
            .map(|rule| LocationRule::new(&rule.context, &rule.file))
            .collect::<Result<_, _>>()?;

        let parse_rules = |rules: &[String]| {
            rules
                .iter()
                .map(|rule| ResidualCategoryRule::parse(rule))
                .collect::<Result<Vec<_>, _>>()
        };

        let classifier = ModelCategoryClassifier::new(
            parse_rules(&source.override_residual_category)?,
            parse_rules(&source.inject_residual_category)?,
        );

        Ok(Self {
            router: ModuleRouter::new(rules),
            exclude,
            excluded,
            ignore_user_data: source
                .ignore_user_data
                .clone()
                .filter(|marker| !marker.is_empty()),
            location_rules,
            classifier,
            min_quiescence: Duration::from_millis(source.min_quiescence_ms),
            tick_interval: Duration::from_millis(source.tick_interval_ms.max(1)),
            max_retries: source.max_retries,
            event_batch_size: source.event_batch_size.max(1),
        })
    }

    pub fn location_mapper(&self) -> LocationMapper {
        LocationMapper::new(self.location_rules.clone())
    }

    /// Checks that every mapped module is known and can be written to.
    pub fn validate(&self, modules: &[Module]) -> Result<(), ConfigError> {
        for (path, name) in self.router.rules() {
            let module = modules
                .iter()
                .find(|module| module.name == name)
                .ok_or_else(|| ConfigError::UnknownModule {
                    name: name.to_owned(),
                    path: path.clone(),
                })?;

            if !module.is_exported() {
                return Err(ConfigError::ModuleNotExported {
                    name: name.to_owned(),
                    path: path.clone(),
                });
            }
        }

        Ok(())
    }
}
