//! Captures changes made to a live content tree and folds them back into the
//! declarative module definitions the tree was built from.

pub mod category;
pub mod change_batch;
pub mod collector;
pub mod config;
pub mod content;
pub mod cursor;
pub mod error;
pub mod export;
pub mod location_mapper;
pub mod merge;
pub mod model;
pub mod path;
pub mod path_pattern;
pub mod path_set;
pub mod processor;
pub mod writer;

pub use crate::category::{Category, CategoryClassifier, ModelCategoryClassifier};
pub use crate::change_batch::{CategoryChanges, ChangeBatch};
pub use crate::collector::ChangeCollector;
pub use crate::config::{ExportConfig, SourceExportConfig};
pub use crate::error::{ConfigError, ExportError, ModelError, StoreError};
pub use crate::export::{DefinitionDiff, TreeExporter};
pub use crate::location_mapper::LocationMapper;
pub use crate::merge::{DefinitionMergeService, MergeResult, ModuleRouter};
pub use crate::model::{ConfigurationModel, Module};
pub use crate::path::NodePath;
pub use crate::processor::{ExportService, ExportStatus, ExportTask};
pub use crate::writer::{JsonSerializer, ModuleSerializer, ModuleWriter};
