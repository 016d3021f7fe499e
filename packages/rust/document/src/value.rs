//! Tagged field values.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::document::Document;

/// A field value: a scalar, an ordered sequence, or a nested node.
///
/// There is no null variant; an absent field is simply not present in its
/// parent node.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    DateTime(DateTime<FixedOffset>),
    /// Ordered values; a sequence of nodes models a repeated sub-structure.
    Sequence(Vec<Value>),
    /// A nested document node.
    Node(Document),
}

impl Value {
    /// Short name of the variant, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Boolean(_) => "boolean",
            Self::DateTime(_) => "datetime",
            Self::Sequence(_) => "sequence",
            Self::Node(_) => "node",
        }
    }

    /// Whether this is a single scalar (not a sequence or node).
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Self::Sequence(_) | Self::Node(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view; integral floats are accepted.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Self::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Document> {
        match self {
            Self::Node(doc) => Some(doc),
            _ => None,
        }
    }

    /// Convert from JSON. `null` maps to `None`; nulls inside arrays and
    /// objects are dropped.
    pub fn from_json(json: serde_json::Value) -> Option<Self> {
        match json {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(Self::Boolean(b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Self::Integer(i)),
                None => n.as_f64().map(Self::Float),
            },
            serde_json::Value::String(s) => Some(Self::String(s)),
            serde_json::Value::Array(items) => Some(Self::Sequence(
                items.into_iter().filter_map(Self::from_json).collect(),
            )),
            serde_json::Value::Object(map) => Some(Self::Node(Document::from_json_map(map))),
        }
    }

    /// Convert to JSON. Datetimes become RFC 3339 strings; non-finite floats
    /// become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Integer(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Boolean(b) => serde_json::Value::Bool(*b),
            Self::DateTime(dt) => serde_json::Value::String(dt.to_rfc3339()),
            Self::Sequence(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            Self::Node(doc) => doc.to_json(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Self::Node(doc)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::Sequence(items.into_iter().map(Into::into).collect())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Self::from_json(json).ok_or_else(|| serde::de::Error::custom("null is not a field value"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_conversion_keeps_number_kinds() {
        let v = Value::from_json(serde_json::json!({"size": 42, "score": 0.75})).unwrap();
        let doc = v.as_node().unwrap();
        assert_eq!(doc.field("size"), Some(&Value::Integer(42)));
        assert_eq!(doc.field("score"), Some(&Value::Float(0.75)));
    }

    #[test]
    fn null_is_absent() {
        assert_eq!(Value::from_json(serde_json::Value::Null), None);
        let v = Value::from_json(serde_json::json!(["a", null, "b"])).unwrap();
        assert_eq!(v, Value::from(vec!["a", "b"]));
    }

    #[test]
    fn datetime_serializes_as_rfc3339() {
        let dt = DateTime::parse_from_rfc3339("2020-01-02T03:04:05+00:00").unwrap();
        let json = serde_json::to_string(&Value::DateTime(dt)).unwrap();
        assert_eq!(json, r#""2020-01-02T03:04:05+00:00""#);
    }

    #[test]
    fn integral_float_reads_as_integer() {
        assert_eq!(Value::Float(3.0).as_i64(), Some(3));
        assert_eq!(Value::Float(3.5).as_i64(), None);
        assert_eq!(Value::Integer(7).as_f64(), Some(7.0));
    }
}
