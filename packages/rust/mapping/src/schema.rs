//! Index schema and value coercion.

use std::collections::HashSet;

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use enrichflow_document::Value;
use enrichflow_shared::{EnrichflowError, Result};

/// Type of an index field.
///
/// Written as `string`, `int64`, `double`, `boolean`, `datetime`, `complex`,
/// or `collection(<kind>)` in definition files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldKind {
    String,
    Int64,
    Double,
    Boolean,
    DateTime,
    Complex,
    Collection(Box<FieldKind>),
}

impl FieldKind {
    pub fn is_collection(&self) -> bool {
        matches!(self, Self::Collection(_))
    }

    /// Convert `value` to this kind.
    ///
    /// A scalar given for a collection becomes a one-element collection.
    pub fn coerce(&self, value: &Value) -> std::result::Result<Value, String> {
        let mismatch = || format!("cannot convert {} to {self}", value.kind_name());
        match (self, value) {
            (Self::String, Value::String(_)) => Ok(value.clone()),
            (Self::String, Value::Integer(i)) => Ok(Value::String(i.to_string())),
            (Self::String, Value::Float(f)) => Ok(Value::String(f.to_string())),
            (Self::String, Value::Boolean(b)) => Ok(Value::String(b.to_string())),
            (Self::String, Value::DateTime(dt)) => Ok(Value::String(dt.to_rfc3339())),

            (Self::Int64, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| format!("'{s}' is not an int64")),
            (Self::Int64, _) => value.as_i64().map(Value::Integer).ok_or_else(mismatch),

            (Self::Double, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| format!("'{s}' is not a double")),
            (Self::Double, _) => value.as_f64().map(Value::Float).ok_or_else(mismatch),

            (Self::Boolean, Value::Boolean(_)) => Ok(value.clone()),
            (Self::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Boolean(true)),
                "false" => Ok(Value::Boolean(false)),
                _ => Err(format!("'{s}' is not a boolean")),
            },

            (Self::DateTime, Value::DateTime(_)) => Ok(value.clone()),
            (Self::DateTime, Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
                .map(Value::DateTime)
                .map_err(|e| format!("'{s}' is not an RFC 3339 datetime: {e}")),

            (Self::Complex, Value::Node(_)) => Ok(value.clone()),

            (Self::Collection(inner), Value::Sequence(items)) => items
                .iter()
                .map(|item| inner.coerce(item))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(Value::Sequence),
            (Self::Collection(inner), scalar) => Ok(Value::Sequence(vec![inner.coerce(scalar)?])),

            _ => Err(mismatch()),
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => f.write_str("string"),
            Self::Int64 => f.write_str("int64"),
            Self::Double => f.write_str("double"),
            Self::Boolean => f.write_str("boolean"),
            Self::DateTime => f.write_str("datetime"),
            Self::Complex => f.write_str("complex"),
            Self::Collection(inner) => write!(f, "collection({inner})"),
        }
    }
}

impl std::str::FromStr for FieldKind {
    type Err = EnrichflowError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let lower = s.to_ascii_lowercase();
        if let Some(inner) = lower
            .strip_prefix("collection(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let inner: FieldKind = inner.parse()?;
            if inner.is_collection() {
                return Err(EnrichflowError::config(format!(
                    "nested collections are not supported: '{s}'"
                )));
            }
            return Ok(Self::Collection(Box::new(inner)));
        }
        match lower.as_str() {
            "string" => Ok(Self::String),
            "int64" => Ok(Self::Int64),
            "double" => Ok(Self::Double),
            "boolean" => Ok(Self::Boolean),
            "datetime" => Ok(Self::DateTime),
            "complex" => Ok(Self::Complex),
            _ => Err(EnrichflowError::config(format!("unknown field type '{s}'"))),
        }
    }
}

impl TryFrom<String> for FieldKind {
    type Error = EnrichflowError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<FieldKind> for String {
    fn from(kind: FieldKind) -> Self {
        kind.to_string()
    }
}

/// One index field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    /// Marks the document key.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub key: bool,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            key: false,
        }
    }

    /// A `string` key field.
    pub fn key(name: impl Into<String>) -> Self {
        Self {
            key: true,
            ..Self::new(name, FieldKind::String)
        }
    }
}

/// The validated field list of an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    fields: Vec<FieldDefinition>,
    key: usize,
}

impl IndexSchema {
    /// Validate `fields`: unique names and exactly one `string` key.
    pub fn new(fields: Vec<FieldDefinition>) -> Result<Self> {
        let mut names = HashSet::new();
        for field in &fields {
            if !names.insert(field.name.as_str()) {
                return Err(EnrichflowError::config(format!(
                    "index field '{}' is defined twice",
                    field.name
                )));
            }
        }

        let keys: Vec<usize> = fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.key)
            .map(|(i, _)| i)
            .collect();
        let key = match keys.as_slice() {
            [only] => *only,
            [] => return Err(EnrichflowError::config("index schema has no key field")),
            _ => {
                return Err(EnrichflowError::config(
                    "index schema must have exactly one key field",
                ));
            }
        };
        if fields[key].kind != FieldKind::String {
            return Err(EnrichflowError::config(format!(
                "key field '{}' must be a string, not {}",
                fields[key].name, fields[key].kind
            )));
        }

        Ok(Self { fields, key })
    }

    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Position of `name` in the schema.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn key_field(&self) -> &FieldDefinition {
        &self.fields[self.key]
    }
}
