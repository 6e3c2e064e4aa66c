use std::{error::Error, fmt, io};

use thiserror::Error;

use crate::path::{NodePath, PathError};

/// Wrapper type to print errors with source-chasing.
pub struct ErrorDisplay<E>(pub E);

impl<E: Error> fmt::Display for ErrorDisplay<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        writeln!(formatter, "{}", self.0)?;

        let mut current_err: &dyn Error = &self.0;
        while let Some(source) = current_err.source() {
            writeln!(formatter, "  caused by {}", source)?;
            current_err = source;
        }

        Ok(())
    }
}

/// Problems with the export configuration. These are fatal: processing does
/// not start until they are corrected.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid path pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid path in configuration")]
    InvalidPath {
        #[from]
        source: PathError,
    },

    #[error("no module is mapped to the root path '/'")]
    NoRootModule,

    #[error("module '{name}' mapped to {path} is not a known module")]
    UnknownModule { name: String, path: NodePath },

    #[error("module '{name}' is mapped to {path} but is not export-eligible")]
    ModuleNotExported { name: String, path: NodePath },

    #[error("invalid category rule '{rule}', expected '<pattern>: <config|content|system>'")]
    InvalidCategoryRule { rule: String },

    #[error("invalid location rule for context '{context}': {reason}")]
    InvalidLocationRule { context: String, reason: String },

    #[error("malformed export configuration")]
    Malformed {
        #[from]
        source: serde_json::Error,
    },
}

/// A failure reported by the content store. Treated as transient.
#[derive(Debug, Error)]
#[error("content store error{}: {message}", .path.as_ref().map(|path| format!(" at {}", path)).unwrap_or_default())]
pub struct StoreError {
    pub message: String,
    pub path: Option<NodePath>,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
        }
    }

    pub fn at(path: &NodePath, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Some(path.clone()),
        }
    }
}

/// The module definitions cannot be applied to build a configuration model.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("cannot define {path}: its parent node does not exist")]
    MissingParent { path: NodePath },

    #[error("cannot create {path}: the definition does not declare a primary type")]
    MissingPrimaryType { path: NodePath },

    #[error("property {path} cannot be replaced with a different type or multiplicity, use override")]
    TypeMismatch { path: NodePath },

    #[error("property {path} cannot be added to: it is not a list of the same type")]
    InvalidAdd { path: NodePath },

    #[error("property {path} has no value")]
    MissingValue { path: NodePath },
}

/// Everything that can go wrong in one export cycle.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Store {
        #[from]
        source: StoreError,
    },

    #[error(transparent)]
    Model {
        #[from]
        source: ModelError,
    },

    #[error(transparent)]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("cannot export {path}: parent node {parent} is missing")]
    MissingParent { path: NodePath, parent: NodePath },

    #[error("failed to serialize source {source_path} of module {module}")]
    Serialize {
        module: String,
        source_path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("export was interrupted")]
    Interrupted,
}

impl ExportError {
    pub(crate) fn missing_parent(path: &NodePath, parent: &NodePath) -> Self {
        Self::MissingParent {
            path: path.clone(),
            parent: parent.clone(),
        }
    }

    /// Errors that should be retried on the next tick without failing the
    /// processor.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExportError::Store { .. })
    }

    /// Errors that only invalidate a single changed path.
    pub fn is_path_local(&self) -> bool {
        matches!(self, ExportError::MissingParent { .. })
    }
}
