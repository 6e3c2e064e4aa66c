//! The declarative definitions and the baseline they produce.

mod builder;
mod configuration;
mod definition;
mod value;

pub use configuration::{
    replay, ConfigurationModel, ConfigurationNode, ConfigurationProperty, ContentEntry,
    DefinitionRef, NamespaceEntry, PropertyContribution,
};
pub use definition::{
    ConfigDefinition, ConfigSource, ContentDefinition, ContentSource, Definition, DefinitionId,
    DefinitionNode, DefinitionProperty, Module, NamespaceDefinition, PropertyOperation,
};
pub use value::{PropertyValue, Value, ValueType, MIXIN_TYPES, PRIMARY_TYPE};

