use std::fmt;

use serde::{Deserialize, Serialize};

/// The name of the property holding a node's primary type.
pub const PRIMARY_TYPE: &str = "jcr:primaryType";

/// The name of the property holding a node's mixin types.
pub const MIXIN_TYPES: &str = "jcr:mixinTypes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueType {
    String,
    Name,
    Path,
    Uri,
    Reference,
    WeakReference,
    Boolean,
    Long,
    Double,
    Decimal,
    Date,
    Binary,
}

/// A single typed value of a property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Value {
    String(String),
    Name(String),
    Path(String),
    Uri(String),
    Reference(String),
    WeakReference(String),
    Boolean(bool),
    Long(i64),
    Double(f64),
    Decimal(String),
    Date(String),
    Binary(Vec<u8>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::String(_) => ValueType::String,
            Value::Name(_) => ValueType::Name,
            Value::Path(_) => ValueType::Path,
            Value::Uri(_) => ValueType::Uri,
            Value::Reference(_) => ValueType::Reference,
            Value::WeakReference(_) => ValueType::WeakReference,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Long(_) => ValueType::Long,
            Value::Double(_) => ValueType::Double,
            Value::Decimal(_) => ValueType::Decimal,
            Value::Date(_) => ValueType::Date,
            Value::Binary(_) => ValueType::Binary,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value)
            | Value::Name(value)
            | Value::Path(value)
            | Value::Uri(value)
            | Value::Reference(value)
            | Value::WeakReference(value)
            | Value::Decimal(value)
            | Value::Date(value) => Some(value),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Boolean(value) => write!(formatter, "{}", value),
            Value::Long(value) => write!(formatter, "{}", value),
            Value::Double(value) => write!(formatter, "{}", value),
            Value::Binary(value) => write!(formatter, "<{} bytes>", value.len()),
            other => formatter.write_str(other.as_str().unwrap_or_default()),
        }
    }
}

/// The value of a property: one value, or an ordered list of values that all
/// share a type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyValue {
    Single(Value),
    Multiple {
        value_type: ValueType,
        values: Vec<Value>,
    },
}

impl PropertyValue {
    pub fn single(value: impl Into<Value>) -> Self {
        PropertyValue::Single(value.into())
    }

    pub fn multiple(value_type: ValueType, values: Vec<Value>) -> Self {
        PropertyValue::Multiple { value_type, values }
    }

    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PropertyValue::Multiple {
            value_type: ValueType::Name,
            values: names.into_iter().map(|name| Value::Name(name.into())).collect(),
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            PropertyValue::Single(value) => value.value_type(),
            PropertyValue::Multiple { value_type, .. } => *value_type,
        }
    }

    pub fn is_multiple(&self) -> bool {
        matches!(self, PropertyValue::Multiple { .. })
    }

    /// Whether `other` differs from `self` in type or multiplicity, which is
    /// what requires an override instead of a plain replace.
    pub fn shape_differs(&self, other: &PropertyValue) -> bool {
        self.value_type() != other.value_type() || self.is_multiple() != other.is_multiple()
    }

    pub fn values(&self) -> &[Value] {
        match self {
            PropertyValue::Single(value) => std::slice::from_ref(value),
            PropertyValue::Multiple { values, .. } => values,
        }
    }

    /// The string form of every value, used for name-like properties.
    pub fn strings(&self) -> Vec<String> {
        self.values().iter().map(ToString::to_string).collect()
    }
}
